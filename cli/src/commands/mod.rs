pub mod audit;
pub mod breaker;
pub mod config;
pub mod health;
pub mod token;
pub mod validate;

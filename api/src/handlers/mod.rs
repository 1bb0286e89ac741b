pub mod admin;
pub mod audio;
pub mod greeting;
pub mod health;

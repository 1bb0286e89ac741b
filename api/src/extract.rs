//! Request extractors: caller address, bearer token and verified identity.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use authz::{token::extract_bearer, Identity};
use std::net::SocketAddr;
use tracing::warn;

use crate::{error::ApiError, AppState};

/// Headers consulted for the client address, in order.
pub const CLIENT_IP_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "http_x_forwarded_for",
    "http_x_forwarded",
    "http_x_cluster_client_ip",
    "http_client_ip",
    "http_forwarded_for",
    "http_forwarded",
    "http_via",
    "remote_addr",
];

/// Best-effort client address: the first hop of the first proxy header that
/// carries a usable value, then the socket peer, then `unknown`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in CLIENT_IP_HEADERS {
        let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() && !first.eq_ignore_ascii_case("unknown") {
            return first.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Raw bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(str::to_string)
}

/// Address of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

/// Caller whose bearer token passed verification.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            warn!(path = %parts.uri.path(), "Missing bearer token");
            ApiError::Unauthorized
        })?;
        let identity = state.gateway.verify_token(&token)?;
        Ok(Authenticated(identity))
    }
}

/// Caller whose token carries the admin role.
#[derive(Debug, Clone)]
pub struct Admin(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Authenticated(identity) = Authenticated::from_request_parts(parts, state).await?;
        if !identity.is_admin() {
            warn!(
                user = %identity.user_id,
                path = %parts.uri.path(),
                "Admin endpoint refused for non-admin caller"
            );
            return Err(ApiError::Forbidden);
        }
        Ok(Admin(identity))
    }
}

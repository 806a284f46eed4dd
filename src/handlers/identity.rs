//! Caller identity taken from headers set by the authenticating proxy.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_PACKAGE_HEADER: &str = "x-client-package";

/// Authenticated user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(UserId)
            .ok_or_else(|| AppError::unauthorized("missing or invalid user id"))
    }
}

/// Name of the client app, recorded in sidecar objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPackage(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientPackage {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(CLIENT_PACKAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown");
        Ok(ClientPackage(name.to_string()))
    }
}

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{AppState, error::error_response};

// Axum extractor guarding administrative routes
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_digest.as_deref() else {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "Admin API is disabled",
            ));
        };

        // Extract the Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| {
                error_response(StatusCode::UNAUTHORIZED, "Missing Authorization header")
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format",
            )
        })?;

        if token_digest(token) != expected {
            tracing::warn!("Rejected admin request with invalid token");
            return Err(error_response(StatusCode::UNAUTHORIZED, "Invalid token"));
        }

        Ok(AdminAuth)
    }
}

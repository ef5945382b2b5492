//! Bearer-token client identity (HS256 JWT).

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{error::ApiError, AppState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientClaims {
    /// Client identity: the client's startup submission record id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization token required")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub fn decode_client_token(token: &str, secret: &str) -> Result<ClientClaims, AuthError> {
    let data = decode::<ClientClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Token issuance lives elsewhere; this exists for tooling and tests.
pub fn encode_client_token(claims: &ClientClaims, secret: &str) -> Result<String, AuthError> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[derive(Debug, Clone)]
pub struct AuthenticatedClient(pub ClientClaims);

impl FromRequestParts<Arc<AppState>> for AuthenticatedClient {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let claims = decode_client_token(token, &state.services.config.jwt_secret)?;
        Ok(AuthenticatedClient(claims))
    }
}

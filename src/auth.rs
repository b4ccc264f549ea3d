use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header required")]
    MissingHeader,

    #[error("Invalid Authorization Header")]
    MalformedHeader,

    #[error("Invalid Token")]
    InvalidToken,
}

/// Caller identity established by the authentication boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub exp: i64,
}

/// Given a bearer token, return an authenticated principal or reject it.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        let user_id = claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::InvalidToken)?;

        Ok(Principal { user_id })
    }
}

/// Splits `Bearer <token>` out of an Authorization header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;

    match header.split_once(' ') {
        Some(("Bearer", token)) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MalformedHeader),
    }
}

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use parley_types::models::Identity;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Server misconfiguration. The process stays up but every connection
    /// is refused until a secret is configured.
    #[error("signing secret is not configured")]
    MissingSecret,

    #[error("no bearer token presented")]
    MissingToken,

    #[error("token rejected")]
    InvalidToken,

    #[error("token carries no subject")]
    MalformedClaim,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Validates connection-time bearer tokens against the shared signing
/// secret. Pure: no side effects beyond the caller's logging.
pub struct Verifier {
    decoding: Option<DecodingKey>,
    validation: Validation,
}

impl Verifier {
    pub fn new(secret: Option<&str>) -> Self {
        let decoding = secret
            .filter(|s| !s.is_empty())
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        Self {
            decoding,
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let Some(key) = &self.decoding else {
            return Err(AuthError::MissingSecret);
        };

        let data =
            decode::<Claims>(token, key, &self.validation).map_err(|_| AuthError::InvalidToken)?;

        let id = data
            .claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or(AuthError::MalformedClaim)?;

        Ok(Identity {
            id,
            email: data.claims.email,
            display_name: data.claims.name,
        })
    }
}

//! Signed bearer tokens (§4.E). HS256 is the reference signature scheme;
//! nothing here depends on that choice beyond the `jsonwebtoken` call, so
//! swapping to an asymmetric algorithm only touches [`TokenConfig`].

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use teleportal_primitives::Permission;

use crate::error::AuthError;

const AUDIENCE: &str = "teleportal";

/// One entry of a token's `documentAccess` list (§4.D). A leading `!` in
/// `pattern` denies rather than grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub pattern: String,
    pub permissions: Vec<Permission>,
}

impl AccessEntry {
    #[must_use]
    pub fn grant(pattern: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            pattern: pattern.into(),
            permissions,
        }
    }

    #[must_use]
    pub fn deny(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let pattern = if pattern.starts_with('!') {
            pattern
        } else {
            format!("!{pattern}")
        };
        Self {
            pattern,
            permissions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.pattern.starts_with('!')
    }

    #[must_use]
    pub fn pattern_body(&self) -> &str {
        self.pattern.strip_prefix('!').unwrap_or(&self.pattern)
    }
}

/// Decoded claim set (§4.E). `room` scopes the connection to one logical
/// namespace; document-level access is governed entirely by
/// `document_access`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub room: String,
    pub document_access: Vec<AccessEntry>,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub secret: String,
    pub ttl: Duration,
}

/// Issues and verifies tokens against one symmetric secret (§4.E).
#[derive(Debug, Clone)]
pub struct TokenCodec {
    config: TokenConfig,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn issue(
        &self,
        user_id: impl Into<String>,
        room: impl Into<String>,
        document_access: Vec<AccessEntry>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + self.config.ttl;

        let claims = Claims {
            user_id: user_id.into(),
            room: room.into(),
            document_access,
            iat: now.timestamp() as u64,
            exp: exp.timestamp() as u64,
            iss: self.config.issuer.clone(),
            aud: AUDIENCE.to_owned(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| AuthError::SigningFailed(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[AUDIENCE]);

        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Ok(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => Err(AuthError::IssuerMismatch),
                jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                    Err(AuthError::AudienceMismatch)
                }
                _ => Err(AuthError::Malformed(err.to_string())),
            },
        }
    }
}

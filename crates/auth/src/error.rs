use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to sign token: {0}")]
    SigningFailed(String),
    #[error("token is expired")]
    Expired,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("token audience does not match (expected \"teleportal\")")]
    AudienceMismatch,
    #[error("malformed token: {0}")]
    Malformed(String),
}

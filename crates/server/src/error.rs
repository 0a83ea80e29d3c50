use teleportal_replicator::ReplicatorError;
use teleportal_session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Replicator(#[from] ReplicatorError),
}

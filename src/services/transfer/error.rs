use uuid::Uuid;

use super::entry::InvalidTransition;
use crate::ports::catalog::AuthorizationStatus;

/// Failures that stop a transfer run before or while it walks the queue.
///
/// Per-entry failures never show up here; they end as `NotFound` or `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Destination library access is not authorized (status: {0})")]
    NotAuthorized(AuthorizationStatus),
    #[error("Failed to prepare destination playlist: {0}")]
    PlaylistUnavailable(color_eyre::Report),
    #[error("A transfer run is already in progress")]
    AlreadyRunning,
    #[error("Failed to persist transfer queue: {0}")]
    Persistence(color_eyre::Report),
    #[error("Transfer entry disappeared from the queue: {0}")]
    EntryNotFound(Uuid),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

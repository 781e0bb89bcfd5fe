use uuid::Uuid;

use super::entry::TransferStatus;
use super::engine::TransferSummary;

/// Progress notifications published by the transfer engine.
///
/// Each `StatusChanged` is sent after the new status has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    QueuePopulated { entries: usize },
    RunStarted { pending: usize },
    StatusChanged {
        id: Uuid,
        source_title: String,
        status: TransferStatus,
    },
    RunFinished(TransferSummary),
    QueueReset,
}

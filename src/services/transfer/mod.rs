//! Resumable transfer of liked tracks into a destination playlist.
//!
//! Every entry walks `Pending -> Searching -> Found -> Adding -> Added`
//! (or stops at `NotFound` / `Failed`), and the whole queue is written to the
//! snapshot store after each step so a restart picks up where it left off.

pub mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod matcher;
pub mod store;
pub mod writer;

pub use engine::{TransferEngine, TransferSettings, TransferSummary};
pub use entry::{QueueSummary, TransferEntry, TransferQueue, TransferStatus};
pub use error::TransferError;
pub use events::TransferEvent;
pub use store::{JsonSnapshotStore, SnapshotStore};

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::source_library::SourceTrack;

/// Lifecycle of a single track transfer.
///
/// `Pending -> Searching -> {Found | NotFound}`, `Found -> Adding -> {Added | Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Searching,
    Found,
    NotFound,
    Adding,
    Added,
    Failed,
}

impl TransferStatus {
    /// No further automatic transition happens from these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::NotFound | TransferStatus::Added | TransferStatus::Failed
        )
    }

    /// Left mid-transition, only observable after a crash.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TransferStatus::Searching | TransferStatus::Found | TransferStatus::Adding
        )
    }

    /// States that carry a destination id.
    pub fn has_destination(self) -> bool {
        matches!(
            self,
            TransferStatus::Found | TransferStatus::Adding | TransferStatus::Added
        )
    }

    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Searching)
                | (Searching, Found)
                | (Searching, NotFound)
                | (Found, Adding)
                | (Adding, Added)
                | (Adding, Failed)
                | (NotFound, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Searching => "searching",
            TransferStatus::Found => "found",
            TransferStatus::NotFound => "not found",
            TransferStatus::Adding => "adding",
            TransferStatus::Added => "added",
            TransferStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One source track's transfer record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferEntry {
    id: Uuid,
    source_title: String,
    source_artist: String,
    status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination_id: Option<String>,
}

impl TransferEntry {
    pub fn new(source_title: impl Into<String>, source_artist: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_title: source_title.into(),
            source_artist: source_artist.into(),
            status: TransferStatus::Pending,
            destination_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_title(&self) -> &str {
        &self.source_title
    }

    pub fn source_artist(&self) -> &str {
        &self.source_artist
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn destination_id(&self) -> Option<&str> {
        self.destination_id.as_deref()
    }

    /// `destination_id` is present exactly when the status says a match exists.
    pub fn is_consistent(&self) -> bool {
        self.status.has_destination() == self.destination_id.is_some()
    }

    /// Moves to `next`, keeping `destination_id` coupled to the status.
    ///
    /// `destination_id` is only read when entering `Found`; it is dropped on
    /// every move into a state without a match.
    pub(super) fn transition(
        &mut self,
        next: TransferStatus,
        destination_id: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        match next {
            TransferStatus::Found => {
                let id = destination_id
                    .filter(|id| !id.is_empty())
                    .ok_or(InvalidTransition {
                        from: self.status,
                        to: next,
                    })?;
                self.destination_id = Some(id);
            }
            next if !next.has_destination() => self.destination_id = None,
            _ => {}
        }

        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transfer transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TransferStatus,
    pub to: TransferStatus,
}

/// A loaded queue that breaks an entry or queue invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidQueue {
    #[error("Entry id {0} appears more than once")]
    DuplicateId(Uuid),
    #[error("Entry {id} is {status} but its destination id does not match that status")]
    DestinationMismatch { id: Uuid, status: TransferStatus },
}

/// Ordered transfer queue; order is the source listing order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TransferQueue {
    entries: Vec<TransferEntry>,
}

impl TransferQueue {
    pub fn from_listing(listing: &[SourceTrack]) -> Self {
        Self {
            entries: listing
                .iter()
                .map(|track| TransferEntry::new(&track.title, &track.artist))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[TransferEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub(super) fn entry_mut(&mut self, index: usize) -> Option<&mut TransferEntry> {
        self.entries.get_mut(index)
    }

    /// Ids are unique and every entry keeps `destination_id` coupled to its status.
    pub fn validate(&self) -> Result<(), InvalidQueue> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.id) {
                return Err(InvalidQueue::DuplicateId(entry.id));
            }
            if !entry.is_consistent() {
                return Err(InvalidQueue::DestinationMismatch {
                    id: entry.id,
                    status: entry.status,
                });
            }
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.status == TransferStatus::Pending)
    }

    pub fn summary(&self) -> QueueSummary {
        let mut summary = QueueSummary {
            total: self.entries.len(),
            ..QueueSummary::default()
        };
        for entry in &self.entries {
            match entry.status {
                TransferStatus::Pending => summary.pending += 1,
                TransferStatus::Added => summary.added += 1,
                TransferStatus::NotFound => summary.not_found += 1,
                TransferStatus::Failed => summary.failed += 1,
                TransferStatus::Searching | TransferStatus::Found | TransferStatus::Adding => {
                    summary.interrupted += 1
                }
            }
        }
        summary
    }
}

#[cfg(test)]
impl TransferQueue {
    pub fn from_entries(entries: Vec<TransferEntry>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
impl TransferEntry {
    pub fn with_status(
        source_title: &str,
        source_artist: &str,
        status: TransferStatus,
        destination_id: Option<&str>,
    ) -> Self {
        Self {
            status,
            destination_id: destination_id.map(str::to_string),
            ..Self::new(source_title, source_artist)
        }
    }
}

/// Per-status counts for the whole queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub added: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Entries a crash left in Searching, Found or Adding.
    pub interrupted: usize,
}

impl fmt::Display for QueueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} pending, {} added, {} not found, {} failed, {} interrupted",
            self.total, self.pending, self.added, self.not_found, self.failed, self.interrupted
        )
    }
}

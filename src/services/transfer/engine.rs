use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::instrument;
use uuid::Uuid;

use super::entry::{QueueSummary, TransferEntry, TransferQueue, TransferStatus};
use super::error::TransferError;
use super::events::TransferEvent;
use super::matcher::{DEFAULT_SEARCH_LIMIT, TopHitMatcher, TrackMatcher};
use super::store::SnapshotStore;
use super::writer::PlaylistWriter;
use crate::ports::catalog::{AuthorizationStatus, CatalogPlaylist, MusicCatalog};
use crate::ports::source_library::{SourceLibrary, SourceTrack};

pub const DEFAULT_PACING: Duration = Duration::from_millis(500);
pub const PLAYLIST_DESCRIPTION: &str = "Tracks transferred from Spotify";

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Wait after every processed entry.
    pub pacing: Duration,
    pub search_limit: u32,
    /// Stop the run when a snapshot write fails instead of carrying on in memory.
    pub abort_on_save_error: bool,
    pub playlist_description: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            search_limit: DEFAULT_SEARCH_LIMIT,
            abort_on_save_error: false,
            playlist_description: PLAYLIST_DESCRIPTION.to_string(),
        }
    }
}

/// Outcome of a single run. Counts only cover entries processed by that run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub processed: usize,
    pub added: usize,
    pub not_found: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} added, {} not found, {} failed",
            self.processed, self.added, self.not_found, self.failed
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Drives every pending entry through search and insertion, one at a time.
///
/// The engine is the only writer of the queue. Each status change is persisted
/// while the queue lock is held, so `entries()` never shows a status that is
/// not on disk yet (unless the write itself failed).
pub struct TransferEngine<C: MusicCatalog, S: SnapshotStore> {
    catalog: Arc<C>,
    matcher: Box<dyn TrackMatcher>,
    writer: PlaylistWriter<C>,
    store: S,
    queue: Mutex<TransferQueue>,
    settings: TransferSettings,
    events: broadcast::Sender<TransferEvent>,
    run_lock: Mutex<()>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

impl<C, S> TransferEngine<C, S>
where
    C: MusicCatalog + 'static,
    S: SnapshotStore,
{
    pub fn new(catalog: Arc<C>, store: S, settings: TransferSettings) -> Self {
        Self::with_queue(catalog, store, TransferQueue::default(), settings)
    }

    /// Builds an engine around the persisted snapshot, or an empty queue if none exists.
    pub fn open(catalog: Arc<C>, store: S, settings: TransferSettings) -> Result<Self> {
        let queue = store
            .load()
            .wrap_err("Failed to load transfer queue")?
            .unwrap_or_default();
        Ok(Self::with_queue(catalog, store, queue, settings))
    }

    pub fn with_queue(
        catalog: Arc<C>,
        store: S,
        queue: TransferQueue,
        settings: TransferSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            matcher: Box::new(TopHitMatcher::new(catalog.clone(), settings.search_limit)),
            writer: PlaylistWriter::new(catalog.clone()),
            catalog,
            store,
            queue: Mutex::new(queue),
            settings,
            events,
            run_lock: Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// Swap the reference "top hit" policy for another one.
    pub fn with_matcher(mut self, matcher: impl TrackMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    pub async fn entries(&self) -> Vec<TransferEntry> {
        self.queue.lock().await.entries().to_vec()
    }

    pub async fn summary(&self) -> QueueSummary {
        self.queue.lock().await.summary()
    }

    /// Fill an empty queue from the source listing. Returns how many entries were created.
    ///
    /// A non-empty queue is left untouched so in-flight progress is never clobbered.
    #[instrument(skip_all, fields(tracks = listing.len()))]
    pub async fn populate(&self, listing: &[SourceTrack]) -> Result<usize, TransferError> {
        let _running = self.run_lock.lock().await;
        let mut queue = self.queue.lock().await;

        if !queue.is_empty() {
            tracing::info!(
                "Transfer queue already holds {} entries, skipping population",
                queue.len()
            );
            return Ok(0);
        }

        *queue = TransferQueue::from_listing(listing);
        tracing::info!("Transfer queue populated with {} entries", queue.len());

        self.persist(&queue)?;
        self.emit(TransferEvent::QueuePopulated {
            entries: queue.len(),
        });
        Ok(queue.len())
    }

    /// Fetch the source listing and populate. Fetches nothing if the queue is already filled.
    pub async fn populate_from(&self, source: &impl SourceLibrary) -> Result<usize> {
        if !self.queue.lock().await.is_empty() {
            tracing::info!("Transfer queue already populated, not fetching source library");
            return Ok(0);
        }

        let listing = source
            .liked_tracks()
            .await
            .wrap_err("Failed to fetch source library")?;

        Ok(self.populate(&listing).await?)
    }

    /// Empty the queue and delete the snapshot. A missing snapshot is fine.
    #[instrument(skip_all)]
    pub async fn reset(&self) {
        let _running = self.run_lock.lock().await;
        let mut queue = self.queue.lock().await;
        queue.clear();
        tracing::info!("Transfer queue cleared");

        match self.store.delete() {
            Ok(()) => tracing::info!("Transfer snapshot deleted"),
            Err(e) => tracing::debug!("Transfer snapshot not deleted: {:?}", e),
        }
        self.emit(TransferEvent::QueueReset);
    }

    /// Put a `NotFound` or `Failed` entry back to `Pending` for the next run.
    pub async fn requeue(&self, id: Uuid) -> Result<()> {
        let _running = self.run_lock.lock().await;
        let mut queue = self.queue.lock().await;

        let index = queue
            .position(id)
            .ok_or_else(|| eyre!("Transfer entry not found: {}", id))?;
        let entry = queue
            .entry_mut(index)
            .ok_or_else(|| eyre!("Transfer entry not found: {}", id))?;

        if !matches!(
            entry.status(),
            TransferStatus::NotFound | TransferStatus::Failed
        ) {
            bail!(
                "Only not found or failed entries can be requeued, '{}' is {}",
                entry.source_title(),
                entry.status()
            );
        }

        entry.transition(TransferStatus::Pending, None)?;
        let event = status_event(entry);

        self.persist(&queue)?;
        self.emit(event);
        Ok(())
    }

    /// Requeue every `NotFound` and `Failed` entry. Returns how many were requeued.
    pub async fn requeue_unsuccessful(&self) -> Result<usize> {
        let _running = self.run_lock.lock().await;
        let mut queue = self.queue.lock().await;

        let mut events = Vec::new();
        for index in 0..queue.len() {
            let Some(entry) = queue.entry_mut(index) else {
                break;
            };
            if matches!(
                entry.status(),
                TransferStatus::NotFound | TransferStatus::Failed
            ) {
                entry.transition(TransferStatus::Pending, None)?;
                events.push(status_event(entry));
            }
        }

        if !events.is_empty() {
            self.persist(&queue)?;
        }
        let count = events.len();
        for event in events {
            self.emit(event);
        }
        tracing::info!("Requeued {} unsuccessful entries", count);
        Ok(count)
    }

    /// Stop the current run before its next entry. When no run is active the
    /// next run stops before its first entry.
    pub fn cancel(&self) {
        tracing::info!("Transfer cancellation requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Confirm destination access, asking for it once if it was never decided.
    pub async fn ensure_authorized(&self) -> Result<(), TransferError> {
        let mut status = self.catalog.authorization_status().await;
        if status == AuthorizationStatus::NotDetermined {
            tracing::info!("Destination authorization not determined, requesting access");
            status = self.catalog.request_authorization().await;
        }

        if !status.is_authorized() {
            tracing::error!("Destination library access not granted: {}", status);
            return Err(TransferError::NotAuthorized(status));
        }
        tracing::info!("Destination library access granted");
        Ok(())
    }

    /// Find a library playlist with this name, or create it.
    pub async fn prepare_playlist(&self, name: &str) -> Result<CatalogPlaylist, TransferError> {
        let playlists = self
            .catalog
            .library_playlists()
            .await
            .map_err(TransferError::PlaylistUnavailable)?;

        if let Some(playlist) = playlists.into_iter().find(|p| p.name == name) {
            tracing::info!("Reusing playlist '{}' ({})", playlist.name, playlist.id);
            return Ok(playlist);
        }

        let playlist = self
            .catalog
            .create_playlist(name, &self.settings.playlist_description)
            .await
            .map_err(TransferError::PlaylistUnavailable)?;
        tracing::info!("Created playlist '{}' ({})", playlist.name, playlist.id);
        Ok(playlist)
    }

    /// Authorize, find or create the playlist by name, then run.
    ///
    /// Does nothing, not even a network call, when no entry is pending.
    #[instrument(skip(self))]
    pub async fn transfer(&self, playlist_name: &str) -> Result<TransferSummary, TransferError> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| TransferError::AlreadyRunning)?;

        let outcome = self.transfer_locked(playlist_name).await;
        self.consume_cancel();
        outcome
    }

    async fn transfer_locked(&self, playlist_name: &str) -> Result<TransferSummary, TransferError> {
        if !self.queue.lock().await.has_pending() {
            tracing::info!("No pending entries, nothing to transfer");
            return Ok(TransferSummary::default());
        }

        self.ensure_authorized().await?;
        if self.is_cancelled() {
            return Ok(self.cancelled_before_start());
        }
        let playlist = self.prepare_playlist(playlist_name).await?;
        self.process_queue(&playlist).await
    }

    /// Process every pending entry into `playlist`.
    #[instrument(skip_all, fields(playlist = %playlist.name))]
    pub async fn run(&self, playlist: &CatalogPlaylist) -> Result<TransferSummary, TransferError> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| TransferError::AlreadyRunning)?;

        let outcome = self.run_locked(playlist).await;
        self.consume_cancel();
        outcome
    }

    async fn run_locked(&self, playlist: &CatalogPlaylist) -> Result<TransferSummary, TransferError> {
        if !self.queue.lock().await.has_pending() {
            tracing::info!("No pending entries, nothing to transfer");
            return Ok(TransferSummary::default());
        }

        self.ensure_authorized().await?;
        self.process_queue(playlist).await
    }

    /// A cancel applies to the run in progress, or the next one when idle,
    /// and is used up once that run returns.
    fn consume_cancel(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
    }

    fn cancelled_before_start(&self) -> TransferSummary {
        tracing::info!("Transfer run cancelled before the first entry");
        let summary = TransferSummary {
            cancelled: true,
            ..TransferSummary::default()
        };
        self.emit(TransferEvent::RunFinished(summary));
        summary
    }

    async fn process_queue(
        &self,
        playlist: &CatalogPlaylist,
    ) -> Result<TransferSummary, TransferError> {
        let (len, pending) = {
            let queue = self.queue.lock().await;
            (queue.len(), queue.summary().pending)
        };
        tracing::info!("Transfer run started: {} pending of {}", pending, len);
        self.emit(TransferEvent::RunStarted { pending });

        let mut summary = TransferSummary::default();
        for index in 0..len {
            if self.is_cancelled() {
                tracing::info!("Transfer run cancelled before entry {}", index);
                summary.cancelled = true;
                break;
            }

            let (id, title, artist) = {
                let queue = self.queue.lock().await;
                match queue.entries().get(index) {
                    Some(entry) if entry.status() == TransferStatus::Pending => (
                        entry.id(),
                        entry.source_title().to_string(),
                        entry.source_artist().to_string(),
                    ),
                    Some(_) => continue,
                    None => break,
                }
            };

            let status = self.process_entry(id, &title, &artist, playlist).await?;
            summary.processed += 1;
            match status {
                TransferStatus::Added => summary.added += 1,
                TransferStatus::NotFound => summary.not_found += 1,
                TransferStatus::Failed => summary.failed += 1,
                _ => {}
            }

            self.pace().await;
        }

        tracing::info!("Transfer run finished: {}", summary);
        self.emit(TransferEvent::RunFinished(summary));
        Ok(summary)
    }

    /// One search, at most one insertion. Returns the terminal status reached.
    #[instrument(skip(self, playlist))]
    async fn process_entry(
        &self,
        id: Uuid,
        title: &str,
        artist: &str,
        playlist: &CatalogPlaylist,
    ) -> Result<TransferStatus, TransferError> {
        self.advance(id, TransferStatus::Searching, None).await?;

        let Some(song) = self.matcher.find_match(title, artist).await else {
            self.advance(id, TransferStatus::NotFound, None).await?;
            tracing::warn!("Not found: {} - {}", title, artist);
            return Ok(TransferStatus::NotFound);
        };

        self.advance(id, TransferStatus::Found, Some(song.id.clone()))
            .await?;
        self.advance(id, TransferStatus::Adding, None).await?;

        let status = if self.writer.add_to_playlist(&song, playlist).await {
            TransferStatus::Added
        } else {
            tracing::warn!("Failed to add: {} - {} ({})", title, artist, song.id);
            TransferStatus::Failed
        };
        self.advance(id, status, None).await?;
        Ok(status)
    }

    /// Transition + persist + notify, as one critical section.
    async fn advance(
        &self,
        id: Uuid,
        status: TransferStatus,
        destination_id: Option<String>,
    ) -> Result<(), TransferError> {
        let mut queue = self.queue.lock().await;
        let index = queue
            .position(id)
            .ok_or(TransferError::EntryNotFound(id))?;
        let Some(entry) = queue.entry_mut(index) else {
            return Err(TransferError::EntryNotFound(id));
        };

        entry.transition(status, destination_id)?;
        tracing::debug!("{} -> {}", entry.source_title(), status);
        let event = status_event(entry);

        self.persist(&queue)?;
        self.emit(event);
        Ok(())
    }

    fn persist(&self, queue: &TransferQueue) -> Result<(), TransferError> {
        match self.store.save(queue) {
            Ok(()) => Ok(()),
            Err(e) if self.settings.abort_on_save_error => {
                tracing::error!("Failed to save transfer queue, stopping: {:?}", e);
                Err(TransferError::Persistence(e))
            }
            Err(e) => {
                tracing::error!("Failed to save transfer queue: {:?}", e);
                Ok(())
            }
        }
    }

    async fn pace(&self) {
        if self.settings.pacing.is_zero() {
            return;
        }

        let notified = self.cancel_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.settings.pacing) => {}
            _ = &mut notified => {
                tracing::debug!("Pacing delay cut short by cancellation");
            }
        }
    }

    fn emit(&self, event: TransferEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn status_event(entry: &TransferEntry) -> TransferEvent {
    TransferEvent::StatusChanged {
        id: entry.id(),
        source_title: entry.source_title().to_string(),
        status: entry.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use crate::ports::catalog::MockMusicCatalog;
    use crate::ports::source_library::MockSourceLibrary;
    use crate::services::transfer::store::{JsonSnapshotStore, MockSnapshotStore};
    use crate::test_utils::{authorized_catalog, fast_settings, playlist, song, temp_store};

    fn engine_with(
        catalog: MockMusicCatalog,
        store: JsonSnapshotStore,
        entries: Vec<TransferEntry>,
    ) -> TransferEngine<MockMusicCatalog, JsonSnapshotStore> {
        TransferEngine::with_queue(
            Arc::new(catalog),
            store,
            TransferQueue::from_entries(entries),
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn test_run_adds_pending_and_leaves_failed_untouched() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .withf(|term, _| term == "Song A Artist X")
            .times(1)
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog
            .expect_add_to_playlist()
            .times(1)
            .returning(|_, _| Ok(()));

        let failed = TransferEntry::with_status("Song B", "Artist Y", TransferStatus::Failed, None);
        let engine = engine_with(
            catalog,
            store,
            vec![TransferEntry::new("Song A", "Artist X"), failed.clone()],
        );

        let summary = engine.run(&playlist()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.added, 1);

        let entries = engine.entries().await;
        assert_eq!(entries[0].status(), TransferStatus::Added);
        assert_eq!(entries[0].destination_id(), Some("am-1"));
        assert_eq!(entries[1], failed);

        // Nothing pending: no catalog call at all, both entries unchanged.
        let again = engine.run(&playlist()).await.unwrap();
        assert_eq!(again, TransferSummary::default());
        assert_eq!(engine.entries().await, entries);
    }

    #[tokio::test]
    async fn test_empty_listing_makes_no_network_calls() {
        let (_dir, store) = temp_store();
        // No expectations: any catalog call panics.
        let engine = engine_with(MockMusicCatalog::new(), store, Vec::new());

        assert_eq!(engine.populate(&[]).await.unwrap(), 0);
        assert!(engine.entries().await.is_empty());

        let summary = engine.run(&playlist()).await.unwrap();
        assert_eq!(summary, TransferSummary::default());
        let summary = engine.transfer("Liked").await.unwrap();
        assert_eq!(summary, TransferSummary::default());
    }

    #[tokio::test]
    async fn test_no_match_becomes_not_found_without_insert() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        catalog.expect_add_to_playlist().never();

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Obscure", "Nobody")]);
        let summary = engine.run(&playlist()).await.unwrap();

        assert_eq!(summary.not_found, 1);
        let entries = engine.entries().await;
        assert_eq!(entries[0].status(), TransferStatus::NotFound);
        assert_eq!(entries[0].destination_id(), None);
    }

    #[tokio::test]
    async fn test_search_error_becomes_not_found() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(1)
            .returning(|_, _| Err(eyre!("connection reset")));
        catalog.expect_add_to_playlist().never();

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);
        engine.run(&playlist()).await.unwrap();

        assert_eq!(engine.entries().await[0].status(), TransferStatus::NotFound);
    }

    #[tokio::test]
    async fn test_insert_error_becomes_failed() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog
            .expect_add_to_playlist()
            .times(1)
            .returning(|_, _| Err(eyre!("500 Internal Server Error")));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);
        let summary = engine.run(&playlist()).await.unwrap();

        assert_eq!(summary.failed, 1);
        let entry = &engine.entries().await[0];
        assert_eq!(entry.status(), TransferStatus::Failed);
        assert!(entry.is_consistent());
    }

    #[tokio::test]
    async fn test_each_transition_is_persisted_before_the_next_call() {
        let (_dir, store) = temp_store();
        let path = store.path().to_path_buf();
        let search_path = path.clone();
        let add_path = path.clone();

        let mut catalog = authorized_catalog();
        catalog.expect_search_songs().returning(move |_, _| {
            let on_disk = JsonSnapshotStore::new(&search_path).load().unwrap().unwrap();
            assert_eq!(on_disk.entries()[0].status(), TransferStatus::Searching);
            Ok(vec![song("am-1")])
        });
        catalog.expect_add_to_playlist().returning(move |_, _| {
            let on_disk = JsonSnapshotStore::new(&add_path).load().unwrap().unwrap();
            assert_eq!(on_disk.entries()[0].status(), TransferStatus::Adding);
            assert_eq!(on_disk.entries()[0].destination_id(), Some("am-1"));
            Ok(())
        });

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);
        engine.run(&playlist()).await.unwrap();

        let on_disk = JsonSnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(on_disk.entries(), engine.entries().await.as_slice());
    }

    #[tokio::test]
    async fn test_resume_only_processes_pending_entries() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(2)
            .returning(|term, _| Ok(vec![song(&format!("am-{}", term))]));
        catalog
            .expect_add_to_playlist()
            .times(2)
            .returning(|_, _| Ok(()));

        let terminal = vec![
            TransferEntry::with_status("Done", "A", TransferStatus::Added, Some("am-0")),
            TransferEntry::with_status("Missing", "B", TransferStatus::NotFound, None),
            TransferEntry::with_status("Broken", "C", TransferStatus::Failed, None),
            TransferEntry::with_status("Stuck", "D", TransferStatus::Adding, Some("am-9")),
        ];
        let mut entries = terminal.clone();
        entries.insert(1, TransferEntry::new("New 1", "E"));
        entries.push(TransferEntry::new("New 2", "F"));

        let engine = engine_with(catalog, store, entries);
        let summary = engine.run(&playlist()).await.unwrap();
        assert_eq!(summary.processed, 2);

        let after = engine.entries().await;
        assert_eq!(after[0], terminal[0]);
        assert_eq!(after[1].status(), TransferStatus::Added);
        assert_eq!(after[2], terminal[1]);
        assert_eq!(after[3], terminal[2]);
        assert_eq!(after[4], terminal[3]);
        assert_eq!(after[5].status(), TransferStatus::Added);
        assert!(after.iter().all(TransferEntry::is_consistent));
    }

    #[tokio::test]
    async fn test_added_entries_are_never_inserted_twice() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(1)
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog
            .expect_add_to_playlist()
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);
        engine.run(&playlist()).await.unwrap();

        let id = engine.entries().await[0].id();
        assert!(engine.requeue(id).await.is_err());
        assert_eq!(engine.requeue_unsuccessful().await.unwrap(), 0);

        engine.run(&playlist()).await.unwrap();
        engine.transfer("Liked").await.unwrap();
        assert_eq!(engine.entries().await[0].status(), TransferStatus::Added);
    }

    #[tokio::test]
    async fn test_unauthorized_run_touches_nothing() {
        let (_dir, store) = temp_store();
        let mut catalog = MockMusicCatalog::new();
        catalog
            .expect_authorization_status()
            .returning(|| AuthorizationStatus::Denied);
        catalog.expect_search_songs().never();

        let entries = vec![TransferEntry::new("Song A", "Artist X")];
        let engine = engine_with(catalog, store.clone(), entries.clone());

        let err = engine.run(&playlist()).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::NotAuthorized(AuthorizationStatus::Denied)
        ));
        assert_eq!(engine.entries().await, entries);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undetermined_authorization_is_requested_once() {
        let (_dir, store) = temp_store();
        let mut catalog = MockMusicCatalog::new();
        catalog
            .expect_authorization_status()
            .times(1)
            .returning(|| AuthorizationStatus::NotDetermined);
        catalog
            .expect_request_authorization()
            .times(1)
            .returning(|| AuthorizationStatus::Authorized);
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(Vec::new()));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);

        assert!(engine.run(&playlist()).await.is_ok());
    }

    #[tokio::test]
    async fn test_restricted_after_request_aborts() {
        let (_dir, store) = temp_store();
        let mut catalog = MockMusicCatalog::new();
        catalog
            .expect_authorization_status()
            .returning(|| AuthorizationStatus::NotDetermined);
        catalog
            .expect_request_authorization()
            .returning(|| AuthorizationStatus::Restricted);
        catalog.expect_library_playlists().never();

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);

        assert!(matches!(
            engine.transfer("Liked").await,
            Err(TransferError::NotAuthorized(
                AuthorizationStatus::Restricted
            ))
        ));
    }

    #[tokio::test]
    async fn test_populate_guard_keeps_queue_byte_for_byte() {
        let (_dir, store) = temp_store();
        let engine = engine_with(MockMusicCatalog::new(), store.clone(), Vec::new());

        let created = engine
            .populate(&[SourceTrack::new("Song A", "Artist X")])
            .await
            .unwrap();
        assert_eq!(created, 1);

        let before = serde_json::to_vec(&engine.entries().await).unwrap();
        let on_disk_before = std::fs::read(store.path()).unwrap();

        let created = engine
            .populate(&[
                SourceTrack::new("Other", "Someone"),
                SourceTrack::new("More", "People"),
            ])
            .await
            .unwrap();
        assert_eq!(created, 0);

        assert_eq!(serde_json::to_vec(&engine.entries().await).unwrap(), before);
        assert_eq!(std::fs::read(store.path()).unwrap(), on_disk_before);
    }

    #[tokio::test]
    async fn test_populate_persists_listing_in_order() {
        let (_dir, store) = temp_store();
        let engine = engine_with(MockMusicCatalog::new(), store.clone(), Vec::new());
        let mut events = engine.subscribe();

        engine
            .populate(&[
                SourceTrack::new("One", "A"),
                SourceTrack::new("Two", "B, C"),
            ])
            .await
            .unwrap();

        let on_disk = store.load().unwrap().unwrap();
        let titles: Vec<_> = on_disk.entries().iter().map(|e| e.source_title()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
        assert_eq!(on_disk.entries()[1].source_artist(), "B, C");
        assert!(
            on_disk
                .entries()
                .iter()
                .all(|e| e.status() == TransferStatus::Pending && e.destination_id().is_none())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            TransferEvent::QueuePopulated { entries: 2 }
        );
    }

    #[tokio::test]
    async fn test_populate_from_fetch_error_leaves_queue_untouched() {
        let (_dir, store) = temp_store();
        let mut source = MockSourceLibrary::new();
        source
            .expect_liked_tracks()
            .times(1)
            .returning(|| Err(eyre!("401 Unauthorized")));

        let engine = engine_with(MockMusicCatalog::new(), store.clone(), Vec::new());

        assert!(engine.populate_from(&source).await.is_err());
        assert!(engine.entries().await.is_empty());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_populate_from_skips_fetch_when_populated() {
        let (_dir, store) = temp_store();
        let mut source = MockSourceLibrary::new();
        source.expect_liked_tracks().never();

        let engine = engine_with(
            MockMusicCatalog::new(),
            store,
            vec![TransferEntry::new("Song A", "Artist X")],
        );

        assert_eq!(engine.populate_from(&source).await.unwrap(), 0);
        assert_eq!(engine.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_queue_and_snapshot() {
        let (_dir, store) = temp_store();
        let engine = engine_with(MockMusicCatalog::new(), store.clone(), Vec::new());
        engine
            .populate(&[SourceTrack::new("Song A", "Artist X")])
            .await
            .unwrap();
        assert!(store.path().exists());

        engine.reset().await;
        assert!(engine.entries().await.is_empty());
        assert!(!store.path().exists());

        // Snapshot already gone: still fine.
        engine.reset().await;
        assert!(engine.entries().await.is_empty());

        // Populate works again after a reset.
        let created = engine
            .populate(&[SourceTrack::new("Song B", "Artist Y")])
            .await
            .unwrap();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_save_failure_does_not_stop_run_by_default() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_save()
            .returning(|_| Err(eyre!("No space left on device")));

        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog.expect_add_to_playlist().returning(|_, _| Ok(()));

        let engine = TransferEngine::with_queue(
            Arc::new(catalog),
            store,
            TransferQueue::from_entries(vec![TransferEntry::new("Song A", "Artist X")]),
            fast_settings(),
        );

        let summary = engine.run(&playlist()).await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(engine.entries().await[0].status(), TransferStatus::Added);
    }

    #[tokio::test]
    async fn test_save_failure_aborts_run_when_configured() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(eyre!("No space left on device")));

        let mut catalog = authorized_catalog();
        catalog.expect_search_songs().never();

        let settings = TransferSettings {
            abort_on_save_error: true,
            ..fast_settings()
        };
        let engine = TransferEngine::with_queue(
            Arc::new(catalog),
            store,
            TransferQueue::from_entries(vec![TransferEntry::new("Song A", "Artist X")]),
            settings,
        );

        let err = engine.run(&playlist()).await.unwrap_err();
        assert!(matches!(err, TransferError::Persistence(_)));
        // The transition itself still stands in memory.
        assert_eq!(
            engine.entries().await[0].status(),
            TransferStatus::Searching
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_entry() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let settings = TransferSettings {
            pacing: Duration::from_secs(30),
            ..fast_settings()
        };
        let engine = Arc::new(TransferEngine::with_queue(
            Arc::new(catalog),
            store,
            TransferQueue::from_entries(vec![
                TransferEntry::new("First", "A"),
                TransferEntry::new("Second", "B"),
            ]),
            settings,
        ));
        let mut events = engine.subscribe();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run(&playlist()).await });

        loop {
            if let TransferEvent::StatusChanged {
                status: TransferStatus::NotFound,
                ..
            } = events.recv().await.unwrap()
            {
                break;
            }
        }
        engine.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should stop during the pacing delay")
            .unwrap()
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 1);
        let entries = engine.entries().await;
        assert_eq!(entries[0].status(), TransferStatus::NotFound);
        assert_eq!(entries[1].status(), TransferStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_before_transfer_stops_before_first_entry() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog.expect_library_playlists().never();
        catalog.expect_create_playlist().never();
        catalog.expect_search_songs().never();
        let engine = engine_with(
            catalog,
            store,
            vec![TransferEntry::new("First", "A"), TransferEntry::new("Second", "B")],
        );

        engine.cancel();
        let summary = engine.transfer("Liked").await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert!(
            engine
                .entries()
                .await
                .iter()
                .all(|e| e.status() == TransferStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_cancel_during_authorization_is_honoured() {
        let (_dir, store) = temp_store();
        let slot: Arc<OnceLock<Arc<TransferEngine<MockMusicCatalog, JsonSnapshotStore>>>> =
            Arc::new(OnceLock::new());

        let mut catalog = MockMusicCatalog::new();
        catalog.expect_authorization_status().times(1).returning({
            let slot = slot.clone();
            move || {
                if let Some(engine) = slot.get() {
                    engine.cancel();
                }
                AuthorizationStatus::Authorized
            }
        });
        catalog.expect_search_songs().never();
        catalog.expect_add_to_playlist().never();

        let engine = Arc::new(engine_with(
            catalog,
            store,
            vec![TransferEntry::new("First", "A"), TransferEntry::new("Second", "B")],
        ));
        assert!(slot.set(engine.clone()).is_ok());

        let summary = engine.run(&playlist()).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert_eq!(engine.summary().await.pending, 2);
    }

    #[tokio::test]
    async fn test_cancel_is_used_up_by_the_run_it_stopped() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));
        let engine = engine_with(catalog, store, vec![TransferEntry::new("Only", "A")]);

        engine.cancel();
        assert!(engine.run(&playlist()).await.unwrap().cancelled);

        let summary = engine.run(&playlist()).await.unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.not_found, 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let (_dir, store) = temp_store();
        let engine = engine_with(
            MockMusicCatalog::new(),
            store,
            vec![TransferEntry::new("Song A", "Artist X")],
        );

        let _held = engine.run_lock.lock().await;

        assert!(matches!(
            engine.run(&playlist()).await,
            Err(TransferError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_transfer_reuses_playlist_with_same_name() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog.expect_library_playlists().returning(|| {
            Ok(vec![
                CatalogPlaylist {
                    id: "p.other".into(),
                    name: "Other".into(),
                },
                CatalogPlaylist {
                    id: "p.1".into(),
                    name: "Liked".into(),
                },
            ])
        });
        catalog.expect_create_playlist().never();
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog
            .expect_add_to_playlist()
            .withf(|_, playlist| playlist.id == "p.1")
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);

        assert_eq!(engine.transfer("Liked").await.unwrap().added, 1);
    }

    #[tokio::test]
    async fn test_transfer_creates_missing_playlist() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_library_playlists()
            .returning(|| Ok(Vec::new()));
        catalog
            .expect_create_playlist()
            .withf(|name, description| name == "Liked" && description == PLAYLIST_DESCRIPTION)
            .times(1)
            .returning(|name, _| {
                Ok(CatalogPlaylist {
                    id: "p.new".into(),
                    name: name.to_string(),
                })
            });
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(Vec::new()));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);

        assert_eq!(engine.transfer("Liked").await.unwrap().not_found, 1);
    }

    #[tokio::test]
    async fn test_playlist_creation_failure_aborts_transfer() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_library_playlists()
            .returning(|| Ok(Vec::new()));
        catalog
            .expect_create_playlist()
            .returning(|_, _| Err(eyre!("403 Forbidden")));
        catalog.expect_search_songs().never();

        let entries = vec![TransferEntry::new("Song A", "Artist X")];
        let engine = engine_with(catalog, store, entries.clone());

        assert!(matches!(
            engine.transfer("Liked").await,
            Err(TransferError::PlaylistUnavailable(_))
        ));
        assert_eq!(engine.entries().await, entries);
    }

    #[tokio::test]
    async fn test_requeue_unsuccessful_then_run_again() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .times(2)
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog
            .expect_add_to_playlist()
            .times(2)
            .returning(|_, _| Ok(()));

        let engine = engine_with(
            catalog,
            store.clone(),
            vec![
                TransferEntry::with_status("a", "x", TransferStatus::NotFound, None),
                TransferEntry::with_status("b", "y", TransferStatus::Failed, None),
                TransferEntry::with_status("c", "z", TransferStatus::Added, Some("am-3")),
            ],
        );

        assert_eq!(engine.requeue_unsuccessful().await.unwrap(), 2);
        let on_disk = store.load().unwrap().unwrap();
        assert_eq!(on_disk.summary().pending, 2);

        let summary = engine.run(&playlist()).await.unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(engine.summary().await.added, 3);
    }

    #[tokio::test]
    async fn test_requeue_unknown_entry_is_an_error() {
        let (_dir, store) = temp_store();
        let engine = engine_with(MockMusicCatalog::new(), store, Vec::new());

        assert!(engine.requeue(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_loads_existing_snapshot() {
        let (_dir, store) = temp_store();
        let queue = TransferQueue::from_entries(vec![TransferEntry::with_status(
            "Song A",
            "Artist X",
            TransferStatus::Added,
            Some("am-1"),
        )]);
        store.save(&queue).unwrap();

        let engine =
            TransferEngine::open(Arc::new(MockMusicCatalog::new()), store, fast_settings())
                .unwrap();

        assert_eq!(engine.entries().await, queue.entries());
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_snapshot() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), b"[{\"id\": 3}]").unwrap();

        let result =
            TransferEngine::open(Arc::new(MockMusicCatalog::new()), store, fast_settings());

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_events_follow_each_transition() {
        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog
            .expect_search_songs()
            .returning(|_, _| Ok(vec![song("am-1")]));
        catalog.expect_add_to_playlist().returning(|_, _| Ok(()));

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")]);
        let mut events = engine.subscribe();
        engine.run(&playlist()).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            TransferEvent::RunStarted { pending: 1 }
        );
        let mut statuses = Vec::new();
        for _ in 0..4 {
            match events.recv().await.unwrap() {
                TransferEvent::StatusChanged { status, .. } => statuses.push(status),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Searching,
                TransferStatus::Found,
                TransferStatus::Adding,
                TransferStatus::Added,
            ]
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            TransferEvent::RunFinished(TransferSummary { added: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_matcher_replaces_top_hit_policy() {
        struct NeverMatches;

        #[async_trait::async_trait]
        impl TrackMatcher for NeverMatches {
            async fn find_match(&self, _: &str, _: &str) -> Option<crate::ports::catalog::CatalogSong> {
                None
            }
        }

        let (_dir, store) = temp_store();
        let mut catalog = authorized_catalog();
        catalog.expect_search_songs().never();

        let engine = engine_with(catalog, store, vec![TransferEntry::new("Song A", "Artist X")])
            .with_matcher(NeverMatches);
        let summary = engine.run(&playlist()).await.unwrap();

        assert_eq!(summary.not_found, 1);
    }
}

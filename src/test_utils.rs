use std::time::Duration;

use tempfile::TempDir;

use crate::ports::catalog::{AuthorizationStatus, CatalogPlaylist, CatalogSong, MockMusicCatalog};
use crate::services::transfer::{JsonSnapshotStore, TransferSettings};

/// Snapshot store inside a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn temp_store() -> (TempDir, JsonSnapshotStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonSnapshotStore::new(dir.path().join("transfers.json"));
    (dir, store)
}

pub fn song(id: &str) -> CatalogSong {
    CatalogSong {
        id: id.to_string(),
        title: format!("Title {}", id),
        artist: format!("Artist {}", id),
    }
}

pub fn playlist() -> CatalogPlaylist {
    CatalogPlaylist {
        id: "p.1".to_string(),
        name: "Liked".to_string(),
    }
}

/// Catalog mock that reports access as granted.
pub fn authorized_catalog() -> MockMusicCatalog {
    let mut catalog = MockMusicCatalog::new();
    catalog
        .expect_authorization_status()
        .returning(|| AuthorizationStatus::Authorized);
    catalog
}

pub fn fast_settings() -> TransferSettings {
    TransferSettings {
        pacing: Duration::ZERO,
        ..TransferSettings::default()
    }
}

use std::sync::Arc;

use crate::ports::catalog::{CatalogPlaylist, CatalogSong, MusicCatalog};

/// Single insertion attempt into a destination playlist.
pub struct PlaylistWriter<C: MusicCatalog> {
    catalog: Arc<C>,
}

impl<C: MusicCatalog> PlaylistWriter<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }

    /// Returns whether the song was added. Errors are logged, never returned.
    pub async fn add_to_playlist(&self, song: &CatalogSong, playlist: &CatalogPlaylist) -> bool {
        tracing::debug!("Adding {} to playlist {}", song.id, playlist.name);

        match self.catalog.add_to_playlist(song, playlist).await {
            Ok(()) => {
                tracing::info!("Added: {} - {}", song.title, song.artist);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to add {} ({}) to playlist {}: {:?}",
                    song.title,
                    song.id,
                    playlist.name,
                    e
                );
                false
            }
        }
    }
}

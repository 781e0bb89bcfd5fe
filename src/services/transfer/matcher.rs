use std::sync::Arc;

use crate::ports::catalog::{CatalogSong, MusicCatalog};

/// How many results the reference policy asks the catalog for.
pub const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Matching policy: picks at most one destination candidate for a source track.
#[async_trait::async_trait]
pub trait TrackMatcher: Send + Sync {
    async fn find_match(&self, source_title: &str, source_artist: &str) -> Option<CatalogSong>;
}

/// Searches `"{title} {artist}"` and takes the top hit.
///
/// Search failures are logged and treated like an empty result.
pub struct TopHitMatcher<C: MusicCatalog> {
    catalog: Arc<C>,
    search_limit: u32,
}

impl<C: MusicCatalog> TopHitMatcher<C> {
    pub fn new(catalog: Arc<C>, search_limit: u32) -> Self {
        Self {
            catalog,
            search_limit: search_limit.max(1),
        }
    }
}

pub fn search_term(source_title: &str, source_artist: &str) -> String {
    format!("{} {}", source_title, source_artist)
}

#[async_trait::async_trait]
impl<C: MusicCatalog> TrackMatcher for TopHitMatcher<C> {
    async fn find_match(&self, source_title: &str, source_artist: &str) -> Option<CatalogSong> {
        let term = search_term(source_title, source_artist);
        tracing::debug!("Searching destination catalog for: {}", term);

        match self.catalog.search_songs(&term, self.search_limit).await {
            Ok(songs) => match songs.into_iter().next() {
                Some(song) => {
                    tracing::info!("Found match: {} - {} ({})", song.title, song.artist, song.id);
                    Some(song)
                }
                None => {
                    tracing::info!("No match found for: {}", term);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Search failed for '{}': {:?}", term, e);
                None
            }
        }
    }
}

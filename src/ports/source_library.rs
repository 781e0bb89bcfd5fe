use color_eyre::eyre::Result;

/// One liked track as listed by the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTrack {
    pub title: String,
    /// All credited artists joined with `", "`.
    pub artist: String,
}

impl SourceTrack {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }
}

/// Port trait for the source library listing.
///
/// Implementations live in `services::spotify::client` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceLibrary: Send + Sync {
    /// Every liked track, flattened across pages, in listing order.
    async fn liked_tracks(&self) -> Result<Vec<SourceTrack>>;
}

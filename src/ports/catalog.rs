use std::fmt;

use color_eyre::eyre::Result;

/// Decoupled representation of a destination catalog song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSong {
    pub id: String,
    pub title: String,
    pub artist: String,
}

/// Writable playlist in the user's destination library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub id: String,
    pub name: String,
}

/// Whether the destination catalog lets us touch the user's library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
    Restricted,
    Unknown,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationStatus::Authorized
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationStatus::Authorized => "authorized",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::NotDetermined => "not determined",
            AuthorizationStatus::Restricted => "restricted",
            AuthorizationStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Port trait wrapping the destination catalog capabilities used by the transfer engine.
///
/// Implementations live in `services::apple_music::client` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MusicCatalog: Send + Sync {
    async fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for access; returns the status after asking.
    async fn request_authorization(&self) -> AuthorizationStatus;

    /// Ranked song results for a free-text query, best first.
    async fn search_songs(&self, term: &str, limit: u32) -> Result<Vec<CatalogSong>>;

    async fn library_playlists(&self) -> Result<Vec<CatalogPlaylist>>;

    async fn create_playlist(&self, name: &str, description: &str) -> Result<CatalogPlaylist>;

    async fn add_to_playlist(&self, song: &CatalogSong, playlist: &CatalogPlaylist)
    -> Result<()>;
}

use color_eyre::eyre::Result;
use reqwest::Client;
use url::Url;

use crate::apple_music_rs::catalog::{CatalogSongResource, search_songs};
use crate::apple_music_rs::library::{
    LibraryPlaylistResource, add_songs_to_library_playlist, create_library_playlist,
    get_library_playlists,
};
use crate::apple_music_rs::storefront::probe_user_access;
use crate::apple_music_rs::{APPLE_MUSIC_API_URL, AppleMusicTokens};
use crate::ports::catalog::{AuthorizationStatus, CatalogPlaylist, CatalogSong, MusicCatalog};

/// Production `MusicCatalog` backed by the Apple Music web API.
pub struct AppleMusicHttpAdapter {
    client: Client,
    base_url: Url,
    tokens: AppleMusicTokens,
    storefront: String,
}

impl AppleMusicHttpAdapter {
    pub fn new(tokens: AppleMusicTokens, storefront: String) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(APPLE_MUSIC_API_URL)?,
            tokens,
            storefront,
        })
    }
}

impl From<CatalogSongResource> for CatalogSong {
    fn from(resource: CatalogSongResource) -> Self {
        let (title, artist) = resource
            .attributes
            .map(|a| (a.name, a.artist_name))
            .unwrap_or_default();
        CatalogSong {
            id: resource.id,
            title,
            artist,
        }
    }
}

impl From<LibraryPlaylistResource> for CatalogPlaylist {
    fn from(resource: LibraryPlaylistResource) -> Self {
        CatalogPlaylist {
            name: resource.attributes.map(|a| a.name).unwrap_or_default(),
            id: resource.id,
        }
    }
}

#[async_trait::async_trait]
impl MusicCatalog for AppleMusicHttpAdapter {
    async fn authorization_status(&self) -> AuthorizationStatus {
        probe_user_access(&self.client, &self.base_url, &self.tokens).await
    }

    async fn request_authorization(&self) -> AuthorizationStatus {
        // A web client cannot show a consent sheet; the user token has to come from config.
        let status = self.authorization_status().await;
        if status == AuthorizationStatus::NotDetermined {
            tracing::warn!(
                "No Apple Music user token configured; set apple_music.music_user_token or APPLE_MUSIC_USER_TOKEN"
            );
        }
        status
    }

    async fn search_songs(&self, term: &str, limit: u32) -> Result<Vec<CatalogSong>> {
        let songs = search_songs(
            &self.client,
            &self.base_url,
            &self.tokens,
            &self.storefront,
            term,
            limit,
        )
        .await?;
        Ok(songs.into_iter().map(CatalogSong::from).collect())
    }

    async fn library_playlists(&self) -> Result<Vec<CatalogPlaylist>> {
        let playlists = get_library_playlists(&self.client, &self.base_url, &self.tokens).await?;
        Ok(playlists.into_iter().map(CatalogPlaylist::from).collect())
    }

    async fn create_playlist(&self, name: &str, description: &str) -> Result<CatalogPlaylist> {
        let playlist =
            create_library_playlist(&self.client, &self.base_url, &self.tokens, name, description)
                .await?;
        Ok(playlist.into())
    }

    async fn add_to_playlist(
        &self,
        song: &CatalogSong,
        playlist: &CatalogPlaylist,
    ) -> Result<()> {
        add_songs_to_library_playlist(
            &self.client,
            &self.base_url,
            &self.tokens,
            &playlist.id,
            &[song.id.as_str()],
        )
        .await
    }
}

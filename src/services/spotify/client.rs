use color_eyre::eyre::Result;

use crate::ports::source_library::{SourceLibrary, SourceTrack};
use crate::spotify_rs::client::SpotifyClient;
use crate::spotify_rs::types::SpotifyTrack;

/// Production `SourceLibrary`: the current user's Spotify liked tracks.
pub struct SpotifyHttpAdapter {
    client: SpotifyClient,
}

impl SpotifyHttpAdapter {
    pub fn new(access_token: String) -> Self {
        Self {
            client: SpotifyClient::new(access_token),
        }
    }
}

impl From<SpotifyTrack> for SourceTrack {
    fn from(track: SpotifyTrack) -> Self {
        SourceTrack {
            artist: track.artist_names(),
            title: track.name,
        }
    }
}

#[async_trait::async_trait]
impl SourceLibrary for SpotifyHttpAdapter {
    async fn liked_tracks(&self) -> Result<Vec<SourceTrack>> {
        let tracks = self.client.get_saved_tracks().await?;
        tracing::info!("Fetched {} liked tracks from Spotify", tracks.len());
        Ok(tracks.into_iter().map(SourceTrack::from).collect())
    }
}

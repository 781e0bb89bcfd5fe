use serde::{Deserialize, Serialize};

/// Spotify OAuth token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// One page of `GET /v1/me/tracks`
#[derive(Debug, Clone, Deserialize)]
pub struct SavedTracksPage {
    pub items: Vec<SavedTrackItem>,
    pub next: Option<String>,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedTrackItem {
    #[serde(default)]
    pub added_at: Option<String>,
    /// Missing for tracks that are no longer available.
    pub track: Option<SpotifyTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTrack {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub artists: Vec<SpotifyArtist>,
}

impl SpotifyTrack {
    /// Credited artists in order, joined with `", "`.
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyArtist {
    pub name: String,
}

/// Response for authentication initiation
#[derive(Debug, Clone)]
pub struct SpotifyAuthRequest {
    pub auth_url: url::Url,
    pub state: String,
}

use reqwest::RequestBuilder;
use serde::Deserialize;

pub mod catalog;
pub mod library;
pub mod storefront;

/// Docs:
/// https://developer.apple.com/documentation/applemusicapi
pub const APPLE_MUSIC_API_URL: &str = "https://api.music.apple.com/";

/// Tokens for the Apple Music API.
///
/// The developer token signs every request; the music user token unlocks the
/// user's library (`/v1/me/...`).
#[derive(Debug, Clone)]
pub struct AppleMusicTokens {
    pub developer_token: String,
    pub music_user_token: Option<String>,
}

impl AppleMusicTokens {
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .bearer_auth(&self.developer_token)
            .header("Accept", "application/json");
        match &self.music_user_token {
            Some(token) => request.header("Music-User-Token", token),
            None => request,
        }
    }
}

/* ---------- Core response envelope ---------- */

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceCollection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Option<A>,
}

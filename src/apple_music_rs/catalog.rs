use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{AppleMusicTokens, Resource, ResourceCollection};

/// The search endpoint refuses larger pages.
pub const MAX_SEARCH_LIMIT: u32 = 25;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongAttributes {
    pub name: String,
    pub artist_name: String,
    #[serde(default)]
    pub album_name: Option<String>,
}

pub type CatalogSongResource = Resource<SongAttributes>;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub results: SearchResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    /// Absent when nothing matched.
    #[serde(default)]
    pub songs: Option<ResourceCollection<CatalogSongResource>>,
}

impl SearchResponse {
    pub fn into_songs(self) -> Vec<CatalogSongResource> {
        self.results.songs.map(|songs| songs.data).unwrap_or_default()
    }
}

/// Search the catalog of `storefront` for songs, best match first.
pub async fn search_songs(
    client: &Client,
    base_url: &Url,
    tokens: &AppleMusicTokens,
    storefront: &str,
    term: &str,
    limit: u32,
) -> Result<Vec<CatalogSongResource>> {
    let mut url = base_url.join(&format!("v1/catalog/{}/search", storefront))?;
    url.query_pairs_mut()
        .append_pair("term", term)
        .append_pair("types", "songs")
        .append_pair("limit", &limit.clamp(1, MAX_SEARCH_LIMIT).to_string());

    let res = tokens
        .authorize(client.get(url))
        .send()
        .await?
        .error_for_status()?
        .json::<SearchResponse>()
        .await
        .wrap_err("Failed to deserialize Apple Music search response")?;

    Ok(res.into_songs())
}

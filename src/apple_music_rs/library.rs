use color_eyre::eyre::{OptionExt, Result, WrapErr};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AppleMusicTokens, Resource, ResourceCollection};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryPlaylistAttributes {
    pub name: String,
    #[serde(default)]
    pub can_edit: Option<bool>,
}

pub type LibraryPlaylistResource = Resource<LibraryPlaylistAttributes>;

/* ---------- Playlists ---------- */

/// Every playlist in the user's library, following `next`.
pub async fn get_library_playlists(
    client: &Client,
    base_url: &Url,
    tokens: &AppleMusicTokens,
) -> Result<Vec<LibraryPlaylistResource>> {
    let mut playlists = Vec::new();
    let mut next = Some("v1/me/library/playlists?limit=100".to_string());

    while let Some(path) = next {
        let url = base_url.join(&path)?;
        let page = tokens
            .authorize(client.get(url))
            .send()
            .await?
            .error_for_status()?
            .json::<ResourceCollection<LibraryPlaylistResource>>()
            .await
            .wrap_err("Failed to deserialize library playlists response")?;

        playlists.extend(page.data);
        next = page.next;
    }

    Ok(playlists)
}

/* ---------- Create playlist ---------- */

#[derive(Debug, Serialize)]
struct CreatePlaylistRequest<'a> {
    attributes: CreatePlaylistAttributes<'a>,
}

#[derive(Debug, Serialize)]
struct CreatePlaylistAttributes<'a> {
    name: &'a str,
    description: &'a str,
}

pub async fn create_library_playlist(
    client: &Client,
    base_url: &Url,
    tokens: &AppleMusicTokens,
    name: &str,
    description: &str,
) -> Result<LibraryPlaylistResource> {
    let url = base_url.join("v1/me/library/playlists")?;
    let body = CreatePlaylistRequest {
        attributes: CreatePlaylistAttributes { name, description },
    };

    let res = tokens
        .authorize(client.post(url))
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json::<ResourceCollection<LibraryPlaylistResource>>()
        .await
        .wrap_err("Failed to deserialize create playlist response")?;

    res.data
        .into_iter()
        .next()
        .ok_or_eyre("Create playlist response had no data")
}

/* ---------- Add tracks ---------- */

#[derive(Debug, Serialize)]
struct TrackReference<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct AddTracksRequest<'a> {
    data: Vec<TrackReference<'a>>,
}

pub async fn add_songs_to_library_playlist(
    client: &Client,
    base_url: &Url,
    tokens: &AppleMusicTokens,
    playlist_id: &str,
    song_ids: &[&str],
) -> Result<()> {
    let url = base_url.join(&format!("v1/me/library/playlists/{}/tracks", playlist_id))?;
    let body = AddTracksRequest {
        data: song_ids
            .iter()
            .map(|id| TrackReference {
                id: *id,
                kind: "songs",
            })
            .collect(),
    };

    tokens
        .authorize(client.post(url))
        .json(&body)
        .send()
        .await?
        .error_for_status()
        .wrap_err("Failed to add tracks to playlist")?;

    Ok(())
}

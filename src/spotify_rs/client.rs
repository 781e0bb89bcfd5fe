use std::num::NonZeroU32;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use color_eyre::Result;
use color_eyre::eyre::Context;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};

use crate::spotify_rs::types::{SavedTracksPage, SpotifyTrack};

const SAVED_TRACKS_URL: &str = "https://api.spotify.com/v1/me/tracks?limit=50";
const PAGE_REQUESTS_PER_SECOND: NonZeroU32 = NonZeroU32::new(5).unwrap();
const MAX_PAGE_RETRIES: usize = 3;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Spotify Web API client for the current user's library
pub struct SpotifyClient {
    access_token: String,
    client: reqwest::Client,
    rate_limiter: DirectRateLimiter,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            client: reqwest::Client::new(),
            rate_limiter: RateLimiter::direct(Quota::per_second(PAGE_REQUESTS_PER_SECOND)),
        }
    }

    /// Every saved ("liked") track, following `next` until the last page.
    pub async fn get_saved_tracks(&self) -> Result<Vec<SpotifyTrack>> {
        let mut all_tracks = Vec::new();
        let mut next_url = Some(SAVED_TRACKS_URL.to_string());

        while let Some(url) = next_url {
            self.rate_limiter.until_ready().await;

            let page = (|| self.get_saved_tracks_page(&url))
                .retry(
                    ExponentialBuilder::default()
                        .with_min_delay(Duration::from_millis(500))
                        .with_max_times(MAX_PAGE_RETRIES),
                )
                .sleep(tokio::time::sleep)
                .when(is_transient)
                .notify(|err, delay| {
                    tracing::warn!("Retrying Spotify page request in {:?}: {}", delay, err);
                })
                .await
                .wrap_err_with(|| format!("Failed to fetch saved tracks page: {}", url))?;

            let before = all_tracks.len();
            all_tracks.extend(page.items.into_iter().filter_map(|item| item.track));
            tracing::info!(
                "Fetched {} saved tracks ({} of {})",
                all_tracks.len() - before,
                all_tracks.len(),
                page.total
            );
            next_url = page.next;
        }

        Ok(all_tracks)
    }

    async fn get_saved_tracks_page(&self, url: &str) -> Result<SavedTracksPage> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        let page: SavedTracksPage = response.json().await?;
        Ok(page)
    }
}

/// Rate limiting, server errors and dropped connections are worth another try.
fn is_transient(err: &color_eyre::Report) -> bool {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) => match e.status() {
            Some(status) => {
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            None => e.is_timeout() || e.is_connect(),
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_tracks_page_deserializes() {
        let json = r#"{
            "href": "https://api.spotify.com/v1/me/tracks?offset=0&limit=50",
            "items": [
                {
                    "added_at": "2024-05-01T10:00:00Z",
                    "track": {
                        "id": "4uLU6hMCjMI75M1A2tKUQC",
                        "name": "Never Gonna Give You Up",
                        "artists": [{ "id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley" }],
                        "duration_ms": 213573
                    }
                },
                { "added_at": "2024-04-01T10:00:00Z", "track": null },
                {
                    "track": {
                        "id": "1",
                        "name": "Under Pressure",
                        "artists": [{ "name": "Queen" }, { "name": "David Bowie" }]
                    }
                }
            ],
            "limit": 50,
            "next": "https://api.spotify.com/v1/me/tracks?offset=50&limit=50",
            "offset": 0,
            "total": 120
        }"#;

        let page: SavedTracksPage = serde_json::from_str(json).unwrap();

        assert_eq!(page.total, 120);
        assert!(page.next.is_some());
        let tracks: Vec<_> = page.items.into_iter().filter_map(|i| i.track).collect();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].artist_names(), "Rick Astley");
        assert_eq!(tracks[1].artist_names(), "Queen, David Bowie");
    }

    #[test]
    fn test_last_page_has_no_next() {
        let page: SavedTracksPage =
            serde_json::from_str(r#"{ "items": [], "next": null, "total": 0 }"#).unwrap();

        assert!(page.next.is_none());
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_non_http_errors_are_not_transient() {
        assert!(!is_transient(&color_eyre::eyre::eyre!("bad json")));
    }
}

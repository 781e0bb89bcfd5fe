use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{Context, OptionExt, Result, eyre};
use serde::{Deserialize, Serialize};

use crate::apple_music_rs::AppleMusicTokens;
use crate::services::transfer::TransferSettings;
use crate::services::transfer::engine::PLAYLIST_DESCRIPTION;
use crate::services::transfer::matcher::DEFAULT_SEARCH_LIMIT;
use crate::spotify_rs::auth::SpotifyCredentials;

const APP_DIR: &str = "liked-transfer";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    spotify: SpotifyConfig,
    #[serde(default)]
    apple_music: AppleMusicConfig,
    #[serde(default)]
    transfer: TransferConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleMusicConfig {
    #[serde(default)]
    pub developer_token: Option<String>,
    #[serde(default)]
    pub music_user_token: Option<String>,
    #[serde(default = "default_storefront")]
    pub storefront: String,
}

impl Default for AppleMusicConfig {
    fn default() -> Self {
        Self {
            developer_token: None,
            music_user_token: None,
            storefront: default_storefront(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Defaults to `<data dir>/liked-transfer/transfers.json`
    #[serde(default)]
    pub snapshot_path: Option<String>,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
    #[serde(default = "default_playlist_name")]
    pub playlist_name: String,
    #[serde(default)]
    pub abort_on_save_error: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            pacing_ms: default_pacing_ms(),
            search_limit: default_search_limit(),
            playlist_name: default_playlist_name(),
            abort_on_save_error: false,
        }
    }
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8888/callback".to_string()
}

fn default_storefront() -> String {
    "us".to_string()
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_search_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

fn default_playlist_name() -> String {
    "Spotify Liked Songs".to_string()
}

/// Config value first, then the environment variable.
fn setting_or_env(value: &Option<String>, var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .wrap_err(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Load the default config file, or built-in defaults if there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write a template config to the default location unless one exists.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory on this platform")?;
        if path.exists() {
            tracing::info!("Config already exists at {}", path.display());
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .wrap_err(format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn snapshot_path(&self) -> Result<PathBuf> {
        match &self.transfer.snapshot_path {
            Some(path) => Ok(self.expand_path(path)),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR).join("transfers.json"))
                .ok_or_eyre("No data directory on this platform; set transfer.snapshot_path"),
        }
    }

    pub fn playlist_name(&self) -> &str {
        &self.transfer.playlist_name
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            pacing: Duration::from_millis(self.transfer.pacing_ms),
            search_limit: self.transfer.search_limit,
            abort_on_save_error: self.transfer.abort_on_save_error,
            playlist_description: PLAYLIST_DESCRIPTION.to_string(),
        }
    }

    /// Spotify app credentials, falling back to `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET`.
    pub fn spotify_credentials(&self) -> Result<SpotifyCredentials> {
        let client_id = setting_or_env(&self.spotify.client_id, "SPOTIFY_CLIENT_ID")
            .ok_or_eyre("Spotify client id missing (spotify.client_id or SPOTIFY_CLIENT_ID)")?;
        let client_secret = setting_or_env(&self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET")
            .ok_or_eyre(
                "Spotify client secret missing (spotify.client_secret or SPOTIFY_CLIENT_SECRET)",
            )?;

        Ok(SpotifyCredentials {
            client_id,
            client_secret,
            redirect_uri: self.spotify.redirect_uri.clone(),
        })
    }

    /// Apple Music tokens, falling back to `APPLE_MUSIC_DEVELOPER_TOKEN` / `APPLE_MUSIC_USER_TOKEN`.
    pub fn apple_music_tokens(&self) -> Result<AppleMusicTokens> {
        let developer_token = setting_or_env(
            &self.apple_music.developer_token,
            "APPLE_MUSIC_DEVELOPER_TOKEN",
        )
        .ok_or_else(|| {
            eyre!(
                "Apple Music developer token missing (apple_music.developer_token or APPLE_MUSIC_DEVELOPER_TOKEN)"
            )
        })?;

        Ok(AppleMusicTokens {
            developer_token,
            music_user_token: setting_or_env(
                &self.apple_music.music_user_token,
                "APPLE_MUSIC_USER_TOKEN",
            ),
        })
    }

    pub fn storefront(&self) -> &str {
        &self.apple_music.storefront
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.storefront(), "us");
        assert_eq!(config.playlist_name(), "Spotify Liked Songs");
        let settings = config.transfer_settings();
        assert_eq!(settings.pacing, Duration::from_millis(500));
        assert_eq!(settings.search_limit, 5);
        assert!(!settings.abort_on_save_error);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [spotify]
            client_id = "cid"
            client_secret = "secret"
            redirect_uri = "http://localhost:9000/cb"

            [apple_music]
            developer_token = "dev"
            music_user_token = "user"
            storefront = "tr"

            [transfer]
            snapshot_path = "/tmp/transfers.json"
            pacing_ms = 250
            search_limit = 10
            playlist_name = "From Spotify"
            abort_on_save_error = true
            "#,
        )
        .unwrap();

        let credentials = config.spotify_credentials().unwrap();
        assert_eq!(credentials.client_id, "cid");
        assert_eq!(credentials.redirect_uri, "http://localhost:9000/cb");

        let tokens = config.apple_music_tokens().unwrap();
        assert_eq!(tokens.developer_token, "dev");
        assert_eq!(tokens.music_user_token.as_deref(), Some("user"));
        assert_eq!(config.storefront(), "tr");

        assert_eq!(
            config.snapshot_path().unwrap(),
            PathBuf::from("/tmp/transfers.json")
        );
        let settings = config.transfer_settings();
        assert_eq!(settings.pacing, Duration::from_millis(250));
        assert_eq!(settings.search_limit, 10);
        assert!(settings.abort_on_save_error);
        assert_eq!(config.playlist_name(), "From Spotify");
    }

    #[test]
    fn test_expand_home_path() {
        let config = Config::default();
        let expanded = config.expand_path("~/music/transfers.json");

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("music/transfers.json"));
        }
        assert_eq!(
            config.expand_path("/abs/path.json"),
            PathBuf::from("/abs/path.json")
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml("[transfer]\npacing_ms = \"fast\"").is_err());
    }
}

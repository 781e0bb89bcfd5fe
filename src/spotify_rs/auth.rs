use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::spotify_rs::types::{SpotifyAuthRequest, SpotifyTokenResponse};

const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Reading the liked-tracks library is all we need.
pub const SPOTIFY_SCOPES: [&str; 1] = ["user-library-read"];

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SpotifyAuthError {
    #[error("Failed to build authorization URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Authorization was denied: {reason}")]
    Denied { reason: String },
    #[error("State in the redirect does not match the authorization request")]
    StateMismatch,
    #[error("No authorization code found in callback URL")]
    NoAuthorizationCode,
    #[error("Failed to read the redirect URL: {0}")]
    Prompt(#[source] std::io::Error),
    #[error("Invalid code: {reason}")]
    InvalidCode { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

/// Random state parameter for CSRF protection
fn generate_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Build the authorization-code URL the user has to open.
pub fn authorization_request(
    credentials: &SpotifyCredentials,
) -> Result<SpotifyAuthRequest, SpotifyAuthError> {
    let state = generate_state();
    let scope = SPOTIFY_SCOPES.join(" ");

    let auth_url = Url::parse_with_params(
        SPOTIFY_AUTH_URL,
        &[
            ("client_id", credentials.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", credentials.redirect_uri.as_str()),
            ("state", state.as_str()),
            ("scope", scope.as_str()),
        ],
    )?;

    Ok(SpotifyAuthRequest { auth_url, state })
}

/// Pull the authorization code out of what the user pasted back.
///
/// Accepts either the full redirect URL or the bare code.
pub fn extract_code(input: &str, expected_state: &str) -> Result<String, SpotifyAuthError> {
    let input = input.trim();

    let Ok(url) = Url::parse(input) else {
        if input.is_empty() || input.contains(char::is_whitespace) {
            return Err(SpotifyAuthError::NoAuthorizationCode);
        }
        return Ok(input.to_string());
    };

    let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Err(SpotifyAuthError::Denied {
            reason: error.clone(),
        });
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(SpotifyAuthError::StateMismatch);
    }

    params
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or(SpotifyAuthError::NoAuthorizationCode)
}

/// Exchange authorization code for access token
/// https://developer.spotify.com/documentation/web-api/tutorials/code-flow
pub async fn exchange_code_for_token(
    client: &reqwest::Client,
    credentials: &SpotifyCredentials,
    code: &str,
) -> Result<SpotifyTokenResponse, SpotifyAuthError> {
    let mut params = HashMap::new();
    params.insert("grant_type", "authorization_code");
    params.insert("code", code);
    params.insert("redirect_uri", credentials.redirect_uri.as_str());

    let response = client
        .post(SPOTIFY_TOKEN_URL)
        // Serializes to x-www-form-urlencoded and sets the header (as required by spotify)
        .form(&params)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(SpotifyAuthError::FailedToSendRequest)?;

    if !response.status().is_success() {
        return Err(SpotifyAuthError::InvalidCode {
            reason: response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string()),
        });
    }

    response
        .json()
        .await
        .map_err(SpotifyAuthError::FailedToParseResponse)
}

/// Run the whole authorization-code flow and hand back an access token.
///
/// `prompt` shows the authorization URL and returns whatever the user pasted
/// back (redirect URL or code).
pub async fn obtain_access_token<F>(
    credentials: &SpotifyCredentials,
    prompt: F,
) -> Result<String, SpotifyAuthError>
where
    F: FnOnce(&Url) -> std::io::Result<String>,
{
    let request = authorization_request(credentials)?;
    let pasted = prompt(&request.auth_url).map_err(SpotifyAuthError::Prompt)?;
    let code = extract_code(&pasted, &request.state)?;

    let client = reqwest::Client::new();
    let token = exchange_code_for_token(&client, credentials, &code).await?;
    tracing::info!(
        "Spotify access token obtained (expires in {}s)",
        token.expires_in
    );
    Ok(token.access_token)
}

use reqwest::{Client, StatusCode};
use url::Url;

use super::AppleMusicTokens;
use crate::ports::catalog::AuthorizationStatus;

/// Probe `GET /v1/me/storefront` to learn whether the user token grants library access.
pub async fn probe_user_access(
    client: &Client,
    base_url: &Url,
    tokens: &AppleMusicTokens,
) -> AuthorizationStatus {
    if tokens.music_user_token.is_none() {
        return AuthorizationStatus::NotDetermined;
    }

    let url = match base_url.join("v1/me/storefront") {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("Invalid Apple Music base URL: {}", e);
            return AuthorizationStatus::Unknown;
        }
    };

    match tokens.authorize(client.get(url)).send().await {
        Ok(response) => status_from_response(response.status()),
        Err(e) => {
            tracing::warn!("Apple Music authorization probe failed: {}", e);
            AuthorizationStatus::Unknown
        }
    }
}

fn status_from_response(status: StatusCode) -> AuthorizationStatus {
    match status {
        s if s.is_success() => AuthorizationStatus::Authorized,
        StatusCode::UNAUTHORIZED => AuthorizationStatus::Denied,
        StatusCode::FORBIDDEN => AuthorizationStatus::Restricted,
        _ => AuthorizationStatus::Unknown,
    }
}

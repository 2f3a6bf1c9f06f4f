//! Access-token refresh against the identity-token endpoint.
//!
//! The upstream access credential expires after roughly an hour and nothing
//! in the feed announces it, so the supervisor refreshes opportunistically
//! before every reconnect. A failed refresh is a value, never a panic: the
//! caller decides whether it is fatal.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use padretap_core::Config;

/// Longest response body excerpt kept in an error.
const BODY_EXCERPT_LEN: usize = 200;

/// Upper bound on one refresh round trip.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Reasons a refresh attempt did not yield a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token endpoint rejected refresh ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token response is not JSON: {0}")]
    Malformed(String),

    #[error("Token response has no access_token")]
    MissingAccessToken,

    #[error("Invalid token endpoint: {0}")]
    Endpoint(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Exchanges a refresh credential for a fresh access token.
#[derive(Debug, Clone)]
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
}

impl TokenManager {
    pub fn new(token_url: impl Into<String>) -> Result<Self, TokenError> {
        crate::install_crypto_provider();
        let http = reqwest::Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token_url: token_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TokenError> {
        Self::new(config.upstream.token_url.clone())
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Request a new access token.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        api_key: Option<&str>,
    ) -> Result<String, TokenError> {
        info!("Refreshing access token");
        match self.request(refresh_token, api_key).await {
            Ok(token) => {
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Access token refresh failed");
                Err(e)
            }
        }
    }

    async fn request(&self, refresh_token: &str, api_key: Option<&str>) -> Result<String, TokenError> {
        let mut url =
            Url::parse(&self.token_url).map_err(|e| TokenError::Endpoint(e.to_string()))?;
        if let Some(key) = api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", refresh_token)
            .finish();

        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            return Err(TokenError::Rejected {
                status,
                body: excerpt(&text),
            });
        }

        let data: TokenResponse =
            serde_json::from_str(&text).map_err(|e| TokenError::Malformed(e.to_string()))?;
        data.access_token
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingAccessToken)
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_LEN).collect()
}

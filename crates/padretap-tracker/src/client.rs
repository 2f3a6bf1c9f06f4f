//! Reconnect supervisor.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use padretap_core::{Config, TargetFilter};

use crate::error::TrackerError;
use crate::session::ProtocolSession;
use crate::token::TokenManager;

/// Keeps one upstream session alive at a time, replacing it on failure.
pub struct TrackerClient {
    config: Arc<Config>,
    filter: Arc<TargetFilter>,
    tokens: TokenManager,
    access_token: Option<String>,
}

impl TrackerClient {
    pub fn new(config: Config) -> Result<Self, TrackerError> {
        config.validate()?;
        let filter = Arc::new(TargetFilter::from_config(&config.filter));
        let tokens = TokenManager::from_config(&config)
            .map_err(|e| TrackerError::Bootstrap(e.to_string()))?;
        let access_token = config
            .credentials
            .access_token
            .clone()
            .filter(|t| !t.is_empty());
        Ok(Self {
            config: Arc::new(config),
            filter,
            tokens,
            access_token,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Make sure a usable access token exists before the first connect.
    ///
    /// A configured token is used as is. Without one, a refresh is attempted;
    /// if that is impossible or fails the tracker cannot start.
    pub async fn bootstrap(&mut self) -> Result<(), TrackerError> {
        if self.config.credentials.uid.is_empty() {
            return Err(TrackerError::Bootstrap("subscriber uid is required".into()));
        }
        if self.access_token.is_some() {
            return Ok(());
        }
        if !self.config.credentials.can_refresh() {
            return Err(TrackerError::Bootstrap(
                "no access token and no refresh token configured".into(),
            ));
        }
        let token = self
            .refresh()
            .await
            .map_err(|e| TrackerError::Bootstrap(format!("initial token refresh failed: {e}")))?;
        self.access_token = Some(token);
        Ok(())
    }

    /// Run sessions until shutdown, reconnecting after a fixed delay.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let delay = self.config.session.reconnect_delay();

        loop {
            if *shutdown.borrow() {
                info!("Tracker shutting down");
                return;
            }

            let mut session = ProtocolSession::new(
                Arc::clone(&self.config),
                Arc::clone(&self.filter),
                self.access_token.clone(),
            );
            match session.run(&mut shutdown).await {
                Ok(()) => {
                    info!("Upstream session closed cleanly");
                    return;
                }
                Err(e) => {
                    let stats = session.stats();
                    warn!(
                        error = %e,
                        frames = stats.frames_received,
                        relayed = stats.events_relayed,
                        echoed = stats.events_echoed,
                        dropped = stats.events_dropped,
                        delay_secs = delay.as_secs(),
                        "Upstream session lost, reconnecting"
                    );
                }
            }

            if self.config.credentials.can_refresh() {
                let refreshed = tokio::select! {
                    refreshed = self.refresh() => refreshed,
                    _ = shutdown.changed() => {
                        info!("Tracker shutting down during token refresh");
                        return;
                    }
                };
                match refreshed {
                    Ok(token) => self.access_token = Some(token),
                    Err(e) => error!(error = %e, "Token refresh failed, keeping previous token"),
                }
            }

            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Tracker shutting down during reconnect wait");
                    return;
                }
            }
        }
    }

    async fn refresh(&self) -> Result<String, crate::token::TokenError> {
        let credentials = &self.config.credentials;
        let refresh_token = credentials.refresh_token.as_deref().unwrap_or_default();
        self.tokens
            .refresh(refresh_token, credentials.api_key.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_with(access: Option<&str>, refresh: Option<&str>, uid: &str) -> Config {
        let mut config = Config::default();
        config.credentials.access_token = access.map(String::from);
        config.credentials.refresh_token = refresh.map(String::from);
        config.credentials.uid = uid.to_string();
        config
    }

    #[tokio::test]
    async fn bootstrap_keeps_configured_token() {
        let mut client = TrackerClient::new(config_with(Some("tok"), None, "u1")).unwrap();
        client.bootstrap().await.unwrap();
        assert_eq!(client.access_token(), Some("tok"));
    }

    #[tokio::test]
    async fn bootstrap_requires_uid() {
        let mut client = TrackerClient::new(config_with(Some("tok"), None, "")).unwrap();
        let err = client.bootstrap().await.unwrap_err();
        assert!(matches!(err, TrackerError::Bootstrap(_)));
    }

    #[tokio::test]
    async fn bootstrap_without_any_credential_fails() {
        let mut client = TrackerClient::new(config_with(None, None, "u1")).unwrap();
        assert!(matches!(
            client.bootstrap().await,
            Err(TrackerError::Bootstrap(_))
        ));
    }

    #[tokio::test]
    async fn bootstrap_refreshes_missing_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_with(None, Some("r1"), "u1");
        config.upstream.token_url = format!("{}/v1/token", server.uri());
        let mut client = TrackerClient::new(config).unwrap();
        client.bootstrap().await.unwrap();
        assert_eq!(client.access_token(), Some("fresh"));
    }

    #[tokio::test]
    async fn bootstrap_refresh_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut config = config_with(None, Some("r1"), "u1");
        config.upstream.token_url = format!("{}/v1/token", server.uri());
        let mut client = TrackerClient::new(config).unwrap();
        assert!(matches!(
            client.bootstrap().await,
            Err(TrackerError::Bootstrap(_))
        ));
        assert_eq!(client.access_token(), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config_with(Some("tok"), None, "u1");
        config.upstream.url = "https://not-a-socket".into();
        assert!(matches!(
            TrackerClient::new(config),
            Err(TrackerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_interrupts_hung_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "late"}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let upstream = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        drop(upstream);

        let mut config = config_with(Some("stale"), Some("r1"), "u1");
        config.upstream.url = format!("ws://{upstream_addr}/_multiplex");
        config.upstream.token_url = format!("{}/v1/token", server.uri());
        config.session.reconnect_delay_secs = 0;
        let mut client = TrackerClient::new(config).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            client.run(rx).await;
            client
        });

        // Wait until the refresh request is in flight before signalling.
        for _ in 0..100 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tx.send(true).unwrap();

        let client = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run did not return after shutdown")
            .unwrap();
        assert_eq!(client.access_token(), Some("stale"));
    }

    #[tokio::test]
    async fn run_returns_when_already_shut_down() {
        let mut client = TrackerClient::new(config_with(Some("tok"), None, "u1")).unwrap();
        let (_tx, rx) = watch::channel(true);
        client.run(rx).await;
    }
}

//! Process configuration for padretap.
//!
//! The binaries collect settings from CLI flags, environment variables and an
//! optional `.env` file, then build one [`Config`] value at startup. Every
//! component receives that value (or a section of it) explicitly; nothing in
//! the library crates reads the environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::MatchStrategy;

/// Default upstream multiplex endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://backend1.padre.gg/_multiplex";

/// Default client role sent as the `desc` query parameter.
pub const DEFAULT_CLIENT_ROLE: &str = "/tracker";

/// Origin header the upstream expects from its web client.
pub const DEFAULT_ORIGIN: &str = "https://trade.padre.gg";

/// Desktop browser user agent; the upstream rejects connections without one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Identity-token endpoint used to exchange a refresh credential.
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Placeholder substituted with the subscriber uid in topic templates.
pub const UID_PLACEHOLDER: &str = "{uid}";

/// Topics subscribed when none are configured.
pub const DEFAULT_TOPICS: &[&str] = &[
    "/twitter/tweet/subscribe-feed/v3/{uid}?encodedCategoryFilters=&onlySubscribedAccounts=1",
    "/frontend/trenches/v2",
];

/// Complete padretap configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Check structural invariants that defaults always satisfy.
    ///
    /// Credential presence is not checked here; only the tracker needs
    /// credentials and it reports their absence at bootstrap.
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.session.validate()?;
        self.relay.validate()
    }
}

/// Outbound frame encoding accepted by the upstream deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireVariant {
    /// MessagePack-encoded arrays in binary messages.
    #[default]
    Binary,
    /// JSON-encoded arrays in text messages.
    Json,
}

impl FromStr for WireVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" | "msgpack" => Ok(Self::Binary),
            "json" | "text" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown wire variant: {other}"))),
        }
    }
}

impl fmt::Display for WireVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// When subscribe requests are issued relative to authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribePolicy {
    /// Subscribe right after sending the auth frame, without waiting.
    #[default]
    Eager,
    /// Subscribe once the server has implicitly confirmed the session.
    Confirmed,
}

impl FromStr for SubscribePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(Error::Config(format!("unknown subscribe policy: {other}"))),
        }
    }
}

impl fmt::Display for SubscribePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => f.write_str("eager"),
            Self::Confirmed => f.write_str("confirmed"),
        }
    }
}

/// Upstream feed endpoint and wire settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    /// Client role, sent as the `desc` query parameter.
    pub role: String,
    pub origin: String,
    pub user_agent: String,
    pub wire_variant: WireVariant,
    /// Topic templates; `{uid}` is replaced with the subscriber uid.
    pub topics: Vec<String>,
    pub token_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            role: DEFAULT_CLIENT_ROLE.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            wire_variant: WireVariant::default(),
            topics: DEFAULT_TOPICS.iter().map(ToString::to_string).collect(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Topic paths with the uid substituted.
    pub fn resolved_topics(&self, uid: &str) -> Vec<String> {
        self.topics
            .iter()
            .map(|t| t.replace(UID_PLACEHOLDER, uid))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "upstream url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.topics.is_empty() {
            return Err(Error::Config("at least one topic is required".into()));
        }
        Ok(())
    }
}

/// Credentials used to authenticate the upstream session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub api_key: Option<String>,
    pub uid: String,
}

impl CredentialsConfig {
    /// Whether a refresh can be attempted at all.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Accepted heartbeat intervals, in seconds.
pub const HEARTBEAT_RANGE_SECS: std::ops::RangeInclusive<u64> = 15..=30;

/// Session timing and subscription behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub subscribe_policy: SubscribePolicy,
    /// Delay between the auth frame and eager subscribe requests (ms).
    pub subscribe_settle_ms: u64,
    /// Must fall within [`HEARTBEAT_RANGE_SECS`].
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscribe_policy: SubscribePolicy::default(),
            subscribe_settle_ms: 500,
            heartbeat_interval_secs: 15,
            reconnect_delay_secs: 5,
            connect_timeout_secs: 15,
        }
    }
}

impl SessionConfig {
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn subscribe_settle(&self) -> Duration {
        Duration::from_millis(self.subscribe_settle_ms)
    }

    fn validate(&self) -> Result<()> {
        if !HEARTBEAT_RANGE_SECS.contains(&self.heartbeat_interval_secs) {
            return Err(Error::Config(format!(
                "heartbeat interval must be {}-{}s, got {}s",
                HEARTBEAT_RANGE_SECS.start(),
                HEARTBEAT_RANGE_SECS.end(),
                self.heartbeat_interval_secs
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config("connect timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Target identity filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Target identities, stored lower-cased.
    pub targets: Vec<String>,
    /// Drop non-matching events instead of forwarding them tagged `false`.
    pub filter_only_targets: bool,
    pub strategy: MatchStrategy,
}

impl FilterConfig {
    pub fn new(targets: &str, filter_only_targets: bool, strategy: MatchStrategy) -> Self {
        Self {
            targets: parse_target_list(targets),
            filter_only_targets,
            strategy,
        }
    }
}

/// Relay hub endpoint and relay-side filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Explicit relay URL for the tracker side; derived from host/port if unset.
    pub url: Option<String>,
    /// Re-apply the target filter at the relay before broadcasting.
    pub relay_filter: bool,
    /// Per-subscriber outbound queue depth.
    pub subscriber_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8765,
            url: None,
            relay_filter: false,
            subscriber_queue: 256,
        }
    }
}

impl RelayConfig {
    /// Address the hub listens on.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL the tracker uses to reach the hub.
    ///
    /// A wildcard bind host is not connectable, so it maps to loopback.
    pub fn client_url(&self) -> String {
        if self.host == "0.0.0.0" {
            return format!("ws://127.0.0.1:{}", self.port);
        }
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("ws://{}:{}", self.host, self.port),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("relay host is empty".into()));
        }
        if self.subscriber_queue == 0 {
            return Err(Error::Config("subscriber queue must be non-zero".into()));
        }
        Ok(())
    }
}

/// Split a comma-separated identity list, trimming and lower-casing entries.
pub fn parse_target_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Split a comma-separated topic list, keeping case.
pub fn parse_topic_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.session.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.upstream.wire_variant, WireVariant::Binary);
        assert_eq!(config.session.subscribe_policy, SubscribePolicy::Eager);
    }

    #[test]
    fn target_list_is_trimmed_and_lowercased() {
        assert_eq!(
            parse_target_list(" Alice, ,BOB ,carol"),
            vec!["alice", "bob", "carol"]
        );
        assert!(parse_target_list("").is_empty());
    }

    #[test]
    fn topics_substitute_uid() {
        let upstream = UpstreamConfig::default();
        let topics = upstream.resolved_topics("u123");
        assert_eq!(
            topics[0],
            "/twitter/tweet/subscribe-feed/v3/u123?encodedCategoryFilters=&onlySubscribedAccounts=1"
        );
        assert_eq!(topics[1], "/frontend/trenches/v2");
    }

    #[test]
    fn wildcard_relay_host_maps_to_loopback() {
        let relay = RelayConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            url: Some("ws://example.com:1".into()),
            ..Default::default()
        };
        assert_eq!(relay.client_url(), "ws://127.0.0.1:9000");
        assert_eq!(relay.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn relay_url_prefers_explicit_value() {
        let relay = RelayConfig {
            url: Some("ws://relay.internal:8765".into()),
            ..Default::default()
        };
        assert_eq!(relay.client_url(), "ws://relay.internal:8765");

        let relay = RelayConfig::default();
        assert_eq!(relay.client_url(), "ws://localhost:8765");
    }

    #[test]
    fn enum_options_parse() {
        assert_eq!("JSON".parse::<WireVariant>().unwrap(), WireVariant::Json);
        assert_eq!(
            "confirmed".parse::<SubscribePolicy>().unwrap(),
            SubscribePolicy::Confirmed
        );
        assert!("carrier-pigeon".parse::<WireVariant>().is_err());
    }

    #[test]
    fn invalid_upstream_scheme_rejected() {
        let mut config = Config::default();
        config.upstream.url = "https://backend.padre.gg".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn heartbeat_outside_range_rejected() {
        let mut config = Config::default();
        for secs in [0, 14, 31] {
            config.session.heartbeat_interval_secs = secs;
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{secs}s accepted"
            );
        }
        for secs in [15, 30] {
            config.session.heartbeat_interval_secs = secs;
            assert!(config.validate().is_ok(), "{secs}s rejected");
        }
    }

    #[test]
    fn can_refresh_requires_non_empty_token() {
        let mut creds = CredentialsConfig::default();
        assert!(!creds.can_refresh());
        creds.refresh_token = Some(String::new());
        assert!(!creds.can_refresh());
        creds.refresh_token = Some("r".into());
        assert!(creds.can_refresh());
    }
}

//! padretap Tracker
//!
//! Holds a session to the padre multiplex feed, filters data events by
//! target identity and forwards them to the relay hub.

use clap::Parser;
use tracing::{error, info};

use padretap_core::config::{
    Config, CredentialsConfig, DEFAULT_CLIENT_ROLE, DEFAULT_TOKEN_URL, DEFAULT_UPSTREAM_URL,
    FilterConfig, RelayConfig, SessionConfig, SubscribePolicy, UpstreamConfig, WireVariant,
    parse_topic_list,
};
use padretap_core::MatchStrategy;
use padretap_tracker::TrackerClient;

#[derive(Parser, Debug)]
#[command(name = "padretap-tracker")]
#[command(version, about = "padretap tracker - padre feed client forwarding to the relay")]
struct Args {
    /// Upstream access token
    #[arg(long, env = "PADRE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh token used to obtain new access tokens
    #[arg(long, env = "PADRE_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// API key for the token endpoint
    #[arg(long, env = "PADRE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Subscriber uid, substituted into topic paths
    #[arg(long, env = "PADRE_UID", default_value = "")]
    uid: String,

    /// Relay URL (overrides host/port)
    #[arg(long, env = "RELAY_URL")]
    relay_url: Option<String>,

    /// Relay host
    #[arg(long, env = "RELAY_HOST", default_value = "localhost")]
    relay_host: String,

    /// Relay port
    #[arg(long, env = "RELAY_PORT", default_value_t = 8765)]
    relay_port: u16,

    /// Comma-separated target identities
    #[arg(long, env = "TARGET_USERNAMES", default_value = "")]
    targets: String,

    /// Drop events that do not match a target instead of tagging them
    #[arg(long, env = "FILTER_ONLY_TARGETS")]
    filter_only_targets: bool,

    /// Target matching strategy: "substring" or "structured"
    #[arg(long, env = "PADRETAP_MATCH_STRATEGY", default_value = "substring")]
    match_strategy: MatchStrategy,

    /// When to subscribe: "eager" (after a settle delay) or "confirmed"
    #[arg(long, env = "PADRETAP_SUBSCRIBE_POLICY", default_value = "eager")]
    subscribe_policy: SubscribePolicy,

    /// Outbound frame encoding: "binary" (MessagePack) or "json"
    #[arg(long, env = "PADRETAP_WIRE_VARIANT", default_value = "binary")]
    wire_variant: WireVariant,

    /// Comma-separated topic templates; `{uid}` is substituted
    #[arg(long, env = "PADRETAP_TOPICS")]
    topics: Option<String>,

    /// Upstream multiplex endpoint
    #[arg(long, env = "PADRETAP_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    /// Client role sent as `desc`
    #[arg(long, env = "PADRETAP_CLIENT_ROLE", default_value = DEFAULT_CLIENT_ROLE)]
    client_role: String,

    /// Token refresh endpoint
    #[arg(long, env = "PADRETAP_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    token_url: String,

    /// Seconds between heartbeats
    #[arg(long, env = "PADRETAP_HEARTBEAT_SECS", default_value_t = 15)]
    heartbeat_secs: u64,

    /// Seconds to wait before reconnecting
    #[arg(long, env = "PADRETAP_RECONNECT_DELAY_SECS", default_value_t = 5)]
    reconnect_delay_secs: u64,

    /// Log level filter (e.g. "info", "debug").
    #[arg(long, default_value = "info", env = "PADRETAP_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "PADRETAP_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let mut upstream = UpstreamConfig {
            url: self.upstream_url,
            role: self.client_role,
            wire_variant: self.wire_variant,
            token_url: self.token_url,
            ..UpstreamConfig::default()
        };
        let topics = self
            .topics
            .as_deref()
            .map(parse_topic_list)
            .unwrap_or_default();
        if !topics.is_empty() {
            upstream.topics = topics;
        }

        Config {
            upstream,
            credentials: CredentialsConfig {
                access_token: self.token,
                refresh_token: self.refresh_token,
                api_key: self.api_key,
                uid: self.uid,
            },
            session: SessionConfig {
                subscribe_policy: self.subscribe_policy,
                heartbeat_interval_secs: self.heartbeat_secs,
                reconnect_delay_secs: self.reconnect_delay_secs,
                ..SessionConfig::default()
            },
            filter: FilterConfig::new(&self.targets, self.filter_only_targets, self.match_strategy),
            relay: RelayConfig {
                host: self.relay_host,
                port: self.relay_port,
                url: self.relay_url,
                ..RelayConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let log_filter = padretap_core::tracing_init::default_filter(
        &["padretap_tracker", "padretap_core"],
        &args.log_level,
    );
    padretap_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let config = args.into_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream.url,
        relay = %config.relay.client_url(),
        targets = config.filter.targets.len(),
        filter_only = config.filter.filter_only_targets,
        strategy = %config.filter.strategy,
        "Starting padretap-tracker"
    );

    let mut client = TrackerClient::new(config)?;
    if let Err(e) = client.bootstrap().await {
        error!(error = %e, "Cannot start tracker");
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tracker = tokio::spawn(async move {
        client.run(shutdown_rx).await;
    });

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tracker.await;

    info!("Tracker stopped");
    Ok(())
}

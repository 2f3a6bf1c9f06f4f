//! padretap Relay
//!
//! Local WebSocket hub: every message from any client is rebroadcast to all
//! connected clients.

use clap::Parser;
use tracing::info;

use padretap_core::config::{Config, FilterConfig, RelayConfig};
use padretap_core::MatchStrategy;
use padretap_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "padretap-relay")]
#[command(version, about = "padretap relay - WebSocket broadcast hub")]
struct Args {
    /// Host to bind.
    #[arg(long, env = "RELAY_HOST", default_value = "localhost")]
    host: String,

    /// Port to bind.
    #[arg(long, env = "RELAY_PORT", default_value_t = 8765)]
    port: u16,

    /// Re-apply the target filter before broadcasting.
    #[arg(long, env = "PADRETAP_RELAY_FILTER")]
    relay_filter: bool,

    /// Comma-separated target identities (used with --relay-filter).
    #[arg(long, env = "TARGET_USERNAMES", default_value = "")]
    targets: String,

    /// Drop non-target envelopes (used with --relay-filter).
    #[arg(long, env = "FILTER_ONLY_TARGETS")]
    filter_only_targets: bool,

    /// Target matching strategy: "substring" or "structured".
    #[arg(long, env = "PADRETAP_MATCH_STRATEGY", default_value = "substring")]
    match_strategy: MatchStrategy,

    /// Per-subscriber outbound queue depth.
    #[arg(long, env = "PADRETAP_SUBSCRIBER_QUEUE", default_value_t = 256)]
    subscriber_queue: usize,

    /// Log level filter (e.g. "info", "debug").
    #[arg(long, default_value = "info", env = "PADRETAP_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "PADRETAP_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let log_filter = padretap_core::tracing_init::default_filter(
        &["padretap_relay", "padretap_core"],
        &args.log_level,
    );
    padretap_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let config = Config {
        filter: FilterConfig::new(&args.targets, args.filter_only_targets, args.match_strategy),
        relay: RelayConfig {
            host: args.host,
            port: args.port,
            relay_filter: args.relay_filter,
            subscriber_queue: args.subscriber_queue,
            ..RelayConfig::default()
        },
        ..Config::default()
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.relay.bind_addr(),
        relay_filter = config.relay.relay_filter,
        "Starting padretap-relay"
    );

    let server = RelayServer::bind(&config).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = server.serve() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    info!("Relay stopped");
    Ok(())
}

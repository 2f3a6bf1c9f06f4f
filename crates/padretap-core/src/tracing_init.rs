//! Shared tracing/logging initialization.
//!
//! Both padretap-tracker and padretap-relay set up `tracing_subscriber` the
//! same way: an env-filter plus optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"padretap_tracker=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for a crate, e.g. `padretap_relay=info`.
///
/// Library crates used by the binary log at the same level so that session
/// and hub events show up without extra `RUST_LOG` tuning.
pub fn default_filter(crates: &[&str], level: &str) -> String {
    crates
        .iter()
        .map(|c| format!("{}={level}", c.replace('-', "_")))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_joins_crates() {
        assert_eq!(
            default_filter(&["padretap-tracker", "padretap_core"], "debug"),
            "padretap_tracker=debug,padretap_core=debug"
        );
    }
}

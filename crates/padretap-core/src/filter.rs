//! Target identity matching for decoded feed payloads.
//!
//! Two strategies are supported:
//! - `Substring`: render the whole payload lower-cased and look for any target
//!   anywhere in it. Cheap and permissive; text in any field can match.
//! - `Structured`: read identity fields at a fixed list of key paths and
//!   compare them exactly (case-insensitive). Batch payloads carrying a
//!   `tweets` array match if any element matches.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FilterConfig;
use crate::error::{Error, Result};

/// Key paths probed, in order, by the structured strategy.
const IDENTITY_PATHS: &[&[&str]] = &[
    &["user", "screen_name"],
    &["user", "username"],
    &["screen_name"],
    &["username"],
    &["data", "user", "screen_name"],
];

/// Field holding the element list of a batch payload.
const BATCH_FIELD: &str = "tweets";

/// How payloads are matched against the target set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    #[default]
    Substring,
    Structured,
}

impl FromStr for MatchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "structured" => Ok(Self::Structured),
            other => Err(Error::Config(format!("unknown match strategy: {other}"))),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substring => f.write_str("substring"),
            Self::Structured => f.write_str("structured"),
        }
    }
}

/// Decides whether a payload references one of the configured targets.
#[derive(Debug, Clone)]
pub struct TargetFilter {
    targets: HashSet<String>,
    strategy: MatchStrategy,
    filter_only_targets: bool,
}

impl TargetFilter {
    pub fn new<I, S>(targets: I, strategy: MatchStrategy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            targets: targets
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            strategy,
            filter_only_targets: false,
        }
    }

    /// Build from the filter section of the process configuration.
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.targets, config.strategy).with_filter_only(config.filter_only_targets)
    }

    /// Drop non-matching payloads instead of forwarding them.
    #[must_use]
    pub fn with_filter_only(mut self, filter_only: bool) -> Self {
        self.filter_only_targets = filter_only;
        self
    }

    pub const fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub const fn filter_only_targets(&self) -> bool {
        self.filter_only_targets
    }

    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Whether the payload references a target. An empty target set never matches.
    pub fn is_match(&self, payload: &Value) -> bool {
        if self.targets.is_empty() {
            return false;
        }
        match self.strategy {
            MatchStrategy::Substring => self.matches_substring(payload),
            MatchStrategy::Structured => self.matches_structured(payload),
        }
    }

    /// Match flag to forward with, or `None` when the payload must be dropped.
    pub fn evaluate(&self, payload: &Value) -> Option<bool> {
        let is_match = self.is_match(payload);
        if self.filter_only_targets && !is_match {
            None
        } else {
            Some(is_match)
        }
    }

    fn matches_substring(&self, payload: &Value) -> bool {
        let rendered = match payload {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        self.targets.iter().any(|t| rendered.contains(t.as_str()))
    }

    fn matches_structured(&self, payload: &Value) -> bool {
        if self.matches_identity(payload) {
            return true;
        }
        payload
            .get(BATCH_FIELD)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|item| self.matches_identity(item)))
    }

    fn matches_identity(&self, item: &Value) -> bool {
        IDENTITY_PATHS
            .iter()
            .filter_map(|path| lookup_str(item, path))
            .any(|name| self.targets.contains(&name.to_lowercase()))
    }
}

fn lookup_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
}

use std::time::Duration;

use scenecast_common::id::{prefix, prefixed_ulid};

/// How long a postponed request stays resumable.
pub const DEFAULT_POSTPONED_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Live API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Stable per-process prefix for session ids.
    pub discovery_id: String,
    /// Maximum age of a postponed request before it is evicted.
    pub postponed_max_age: Duration,
    /// Sessions idle longer than this are removed by the sweeper.
    pub session_ttl: Duration,
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Track sessions in the in-memory session menu.
    pub session_menu: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4003,
            discovery_id: prefixed_ulid(prefix::NODE),
            postponed_max_age: DEFAULT_POSTPONED_MAX_AGE,
            session_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            session_menu: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var("PORT").unwrap_or(defaults.port),
            discovery_id: std::env::var("DISCOVERY_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.discovery_id),
            postponed_max_age: secs_var("POSTPONED_MAX_AGE_SECS")
                .unwrap_or(defaults.postponed_max_age),
            session_ttl: secs_var("SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            sweep_interval: secs_var("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval),
            session_menu: parsed_var("SESSION_MENU").unwrap_or(defaults.session_menu),
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn secs_var(name: &str) -> Option<Duration> {
    parsed_var::<u64>(name).map(Duration::from_secs)
}

//! Environment-driven configuration for the core: upload limit, session
//! TTL, orchestration turn limit and per-run timeout.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum accepted upload payload, in bytes.
    pub max_upload_bytes: usize,
    /// Idle duration after which a session is evicted.
    pub session_ttl: Duration,
    /// Maximum planning/acting round-trips per query.
    pub turn_limit: u32,
    /// Wall-clock bound on one orchestration run.
    pub run_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            session_ttl: Duration::from_secs(30 * 60),
            turn_limit: 5,
            run_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Read configuration from `CSVQ_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_upload_bytes: env_parse("CSVQ_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            session_ttl: Duration::from_secs(env_parse(
                "CSVQ_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
            turn_limit: env_parse("CSVQ_TURN_LIMIT", defaults.turn_limit),
            run_timeout: Duration::from_secs(env_parse(
                "CSVQ_RUN_TIMEOUT_SECS",
                defaults.run_timeout.as_secs(),
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "unparsable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

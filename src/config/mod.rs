use std::env;

use chrono::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

use crate::engine::EnginePolicy;

const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;
const DEFAULT_HOLD_WINDOW_SECS: i64 = 6 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub struct Config {
    pub database_url: String,
    pub bind_port: u16,
    /// How long an unconfirmed reservation holds its capacity unit.
    pub reservation_ttl_secs: i64,
    /// How long a notified waitlist entry keeps priority.
    pub hold_window_secs: i64,
    /// How often the background sweep runs.
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/tessera".to_string()),
            bind_port: parse_env("PORT", 3001),
            reservation_ttl_secs: parse_env("RESERVATION_TTL_SECS", DEFAULT_RESERVATION_TTL_SECS),
            hold_window_secs: parse_env("WAITLIST_HOLD_SECS", DEFAULT_HOLD_WINDOW_SECS),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    pub fn engine_policy(&self) -> EnginePolicy {
        EnginePolicy {
            reservation_ttl: Duration::seconds(self.reservation_ttl_secs),
            hold_window: Duration::seconds(self.hold_window_secs),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "Ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        std::env::remove_var("RESERVATION_TTL_SECS");
        let config = Config::from_env();
        assert_eq!(config.reservation_ttl_secs, DEFAULT_RESERVATION_TTL_SECS);
        assert_eq!(config.hold_window_secs, DEFAULT_HOLD_WINDOW_SECS);
    }

    #[test]
    fn policy_durations_match_config() {
        let config = Config::from_env();
        let policy = config.engine_policy();
        assert_eq!(
            policy.reservation_ttl.num_seconds(),
            config.reservation_ttl_secs
        );
        assert_eq!(policy.hold_window.num_seconds(), config.hold_window_secs);
    }
}

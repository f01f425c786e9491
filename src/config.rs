//! # config
//!
//! Runtime configuration, read from environment variables (a `.env` file is
//! loaded by `main` through `dotenvy` first).
//!
//! | Variable                   | Default        |
//! |----------------------------|----------------|
//! | `BIND_ADDR`                | `0.0.0.0:3000` |
//! | `GATEWAY_BASE_URL`         | `mock`         |
//! | `TRADER_USERNAME`          | `trader`       |
//! | `INITIAL_BALANCE`          | `0`            |
//! | `MONITOR_INBOX_CAPACITY`   | `64`           |
//! | `MONITOR_OVERFLOW`         | `block`        |
//! | `MONITOR_SEND_TIMEOUT_MS`  | `50`           |
//! | `CLOSE_TIMEOUT_MS`         | `5000`         |
//! | `CLOSE_RETRIES`            | `3`            |
//! | `CLOSE_BACKOFF_MS`         | `200`          |
//! | `MARGIN_POLICY`            | `strict`       |
//! | `FEED_MAX_RECONNECTS`      | `5`            |
//! | `FEED_BACKOFF_MS`          | `500`          |
//! | `FEED_SYMBOLS`             | *(all)*        |

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

// ─── Policies ─────────────────────────────────────────────────────────────────

/// What `update_price` does when a monitor's inbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the incoming tick immediately.
    RejectNew,
    /// Wait up to `timeout_ms` for room, then drop the tick.
    BlockWithTimeout { timeout_ms: u64 },
}

/// How `trigger_margin_call` treats positions that have not seen a tick yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginPolicy {
    /// The first missing price aborts the whole check with an error.
    Strict,
    /// Missing prices count as zero PnL and are logged.
    SkipUnpriced,
}

// ─── MonitorConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MonitorConfig {
    pub inbox_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Upper bound for a single close call to the trade bridge.
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,
    /// Extra attempts after the first failed close.
    pub close_retries: u32,
    /// Backoff before the first retry; doubled for every further one.
    #[serde(with = "duration_ms")]
    pub close_backoff: Duration,
    pub margin_policy: MarginPolicy,
    pub feed_max_reconnects: u32,
    #[serde(with = "duration_ms")]
    pub feed_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            inbox_capacity:      64,
            overflow:            OverflowPolicy::BlockWithTimeout { timeout_ms: 50 },
            close_timeout:       Duration::from_millis(5_000),
            close_retries:       3,
            close_backoff:       Duration::from_millis(200),
            margin_policy:       MarginPolicy::Strict,
            feed_max_reconnects: 5,
            feed_backoff:        Duration::from_millis(500),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let send_timeout_ms = env_u64("MONITOR_SEND_TIMEOUT_MS", 50);
        let overflow = match std::env::var("MONITOR_OVERFLOW").as_deref() {
            Ok("reject") => OverflowPolicy::RejectNew,
            Ok("block") | Err(_) => OverflowPolicy::BlockWithTimeout { timeout_ms: send_timeout_ms },
            Ok(other) => {
                warn!(value = other, "Unknown MONITOR_OVERFLOW — using block");
                OverflowPolicy::BlockWithTimeout { timeout_ms: send_timeout_ms }
            }
        };

        let margin_policy = match std::env::var("MARGIN_POLICY").as_deref() {
            Ok("skip_unpriced") => MarginPolicy::SkipUnpriced,
            Ok("strict") | Err(_) => MarginPolicy::Strict,
            Ok(other) => {
                warn!(value = other, "Unknown MARGIN_POLICY — using strict");
                MarginPolicy::Strict
            }
        };

        Self {
            // a zero-capacity mpsc channel panics
            inbox_capacity: env_u64("MONITOR_INBOX_CAPACITY", defaults.inbox_capacity as u64).max(1) as usize,
            overflow,
            close_timeout:  Duration::from_millis(env_u64("CLOSE_TIMEOUT_MS", 5_000)),
            close_retries:  env_u32("CLOSE_RETRIES", defaults.close_retries),
            close_backoff:  Duration::from_millis(env_u64("CLOSE_BACKOFF_MS", 200)),
            margin_policy,
            feed_max_reconnects: env_u32("FEED_MAX_RECONNECTS", defaults.feed_max_reconnects),
            feed_backoff:   Duration::from_millis(env_u64("FEED_BACKOFF_MS", 500)),
        }
    }
}

// ─── ServiceConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr:        String,
    /// Base URL of the trade bridge; `"mock"` simulates success.
    pub gateway_base_url: String,
    /// Account the portfolio trades for.
    pub username:         String,
    pub initial_balance:  f64,
    /// Symbols the fan-out subscribes to; empty means every symbol.
    pub feed_symbols:     Vec<String>,
    pub monitor:          MonitorConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr:        env_string("BIND_ADDR", "0.0.0.0:3000"),
            gateway_base_url: env_string("GATEWAY_BASE_URL", "mock"),
            username:         env_string("TRADER_USERNAME", "trader"),
            initial_balance:  env_f64("INITIAL_BALANCE", 0.0),
            feed_symbols:     parse_symbols(&env_string("FEED_SYMBOLS", "")),
            monitor:          MonitorConfig::from_env(),
        }
    }
}

/// `"EURUSD, GBPUSD"` → `["EURUSD", "GBPUSD"]`.
fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let cfg = MonitorConfig::default();
        assert!(cfg.inbox_capacity > 0);
        assert_eq!(cfg.overflow, OverflowPolicy::BlockWithTimeout { timeout_ms: 50 });
        assert_eq!(cfg.margin_policy, MarginPolicy::Strict);
        assert!(cfg.close_timeout > Duration::ZERO);
    }

    #[test]
    fn test_parse_symbols() {
        assert_eq!(parse_symbols("EURUSD, GBPUSD,,"), vec!["EURUSD", "GBPUSD"]);
        assert!(parse_symbols("").is_empty());
    }

    #[test]
    fn test_snapshot_serializes_millis() {
        let v = serde_json::to_value(MonitorConfig::default()).unwrap();
        assert_eq!(v["close_timeout"], 5_000);
        assert_eq!(v["overflow"]["policy"], "block_with_timeout");
    }
}

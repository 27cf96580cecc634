use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::Ms;

/// Knobs the engine itself needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a hold stays ACTIVE without payment.
    pub hold_ttl_ms: Ms,
    /// Upper bound on one payment capture or refund call.
    pub payment_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 10 * 60 * 1000,
            payment_timeout: Duration::from_secs(30),
        }
    }
}

/// Daemon configuration, read from `SEATLOCK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub catalog: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            sweep_interval: Duration::from_secs(5),
            catalog: None,
            engine: EngineConfig::default(),
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: lookup("SEATLOCK_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "SEATLOCK_PORT").unwrap_or(d.port),
            data_dir: lookup("SEATLOCK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections: parsed(&lookup, "SEATLOCK_MAX_CONNECTIONS")
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "SEATLOCK_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "SEATLOCK_METRICS_PORT"),
            sweep_interval: parsed(&lookup, "SEATLOCK_SWEEP_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(d.sweep_interval),
            catalog: lookup("SEATLOCK_CATALOG").map(PathBuf::from),
            engine: EngineConfig {
                hold_ttl_ms: parsed(&lookup, "SEATLOCK_HOLD_TTL_MS")
                    .filter(|ms: &Ms| *ms > 0)
                    .unwrap_or(d.engine.hold_ttl_ms),
                payment_timeout: parsed(&lookup, "SEATLOCK_PAYMENT_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(d.engine.payment_timeout),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.port, 7433);
        assert_eq!(cfg.engine.hold_ttl_ms, 600_000);
        assert_eq!(cfg.engine.payment_timeout, Duration::from_secs(30));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/ledger.wal"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("SEATLOCK_PORT", "9000"),
            ("SEATLOCK_BIND", "127.0.0.1"),
            ("SEATLOCK_HOLD_TTL_MS", "2000"),
            ("SEATLOCK_PAYMENT_TIMEOUT_MS", "250"),
            ("SEATLOCK_METRICS_PORT", "9100"),
            ("SEATLOCK_SWEEP_INTERVAL_MS", "100"),
            ("SEATLOCK_CATALOG", "/etc/seatlock/shows.json"),
        ]));
        assert_eq!(cfg.listen_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.engine.hold_ttl_ms, 2000);
        assert_eq!(cfg.engine.payment_timeout, Duration::from_millis(250));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.sweep_interval, Duration::from_millis(100));
        assert_eq!(cfg.catalog, Some(PathBuf::from("/etc/seatlock/shows.json")));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("SEATLOCK_PORT", "not-a-port"),
            ("SEATLOCK_HOLD_TTL_MS", "-5"),
        ]));
        assert_eq!(cfg.port, 7433);
        assert_eq!(cfg.engine.hold_ttl_ms, 600_000);
    }
}

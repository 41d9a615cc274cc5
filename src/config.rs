use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Server settings read from `TABLECAP_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub calendar_cache_ttl: Duration,
    pub metrics_port: Option<u16>,
    pub log_json: bool,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5434,
            data_dir: PathBuf::from("./data"),
            password: "tablecap".into(),
            max_connections: 256,
            compact_threshold: 1000,
            calendar_cache_ttl: Duration::from_secs(20),
            metrics_port: None,
            log_json: false,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            bind: parsed("TABLECAP_BIND").unwrap_or(d.bind),
            port: number(&lookup, "TABLECAP_PORT", d.port),
            data_dir: parsed("TABLECAP_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("TABLECAP_PASSWORD").unwrap_or(d.password),
            max_connections: number(&lookup, "TABLECAP_MAX_CONNECTIONS", d.max_connections).max(1),
            compact_threshold: number(&lookup, "TABLECAP_COMPACT_THRESHOLD", d.compact_threshold),
            calendar_cache_ttl: Duration::from_secs(number(
                &lookup,
                "TABLECAP_CALENDAR_CACHE_TTL_SECS",
                d.calendar_cache_ttl.as_secs(),
            )),
            metrics_port: parsed("TABLECAP_METRICS_PORT").and_then(|raw| match raw.trim().parse() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!("ignoring TABLECAP_METRICS_PORT={raw:?}: not a port number");
                    None
                }
            }),
            log_json: parsed("TABLECAP_LOG_JSON").is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
            tls_cert: parsed("TABLECAP_TLS_CERT"),
            tls_key: parsed("TABLECAP_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn number<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring {key}={raw:?}, using default {default}");
            default
        }),
    }
}

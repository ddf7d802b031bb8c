use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;
use tracing::info;

use crate::engine::{EngineOptions, ExceptionMode};
use crate::model::SlotTime;

/// Server settings, read from `COVERS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_user: String,
    pub admin_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub engine: EngineOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let utc_offset_minutes: i32 = load(&lookup, "COVERS_UTC_OFFSET_MINUTES", "0")?;
        let utc_offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| ConfigError {
            key: "COVERS_UTC_OFFSET_MINUTES",
            reason: format!("offset out of range: {utc_offset_minutes}"),
        })?;
        let dinner_starts_at: SlotTime = load(&lookup, "COVERS_DINNER_STARTS_AT", "17:00")?;
        let exception_mode: ExceptionMode = load(&lookup, "COVERS_EXCEPTION_MODE", "enforce")?;
        let enforce_slot_cap: bool = load(&lookup, "COVERS_ENFORCE_SLOT_CAP", "false")?;

        Ok(Self {
            port: load(&lookup, "COVERS_PORT", "5433")?,
            bind: load(&lookup, "COVERS_BIND", "0.0.0.0")?,
            data_dir: load(&lookup, "COVERS_DATA_DIR", "./data")?,
            password: load(&lookup, "COVERS_PASSWORD", "covers")?,
            admin_user: load(&lookup, "COVERS_ADMIN_USER", "admin")?,
            admin_password: load(&lookup, "COVERS_ADMIN_PASSWORD", "covers-admin")?,
            max_connections: load(&lookup, "COVERS_MAX_CONNECTIONS", "256")?,
            compact_threshold: load(&lookup, "COVERS_COMPACT_THRESHOLD", "1000")?,
            metrics_port: optional(&lookup, "COVERS_METRICS_PORT")?,
            tls_cert: optional(&lookup, "COVERS_TLS_CERT")?,
            tls_key: optional(&lookup, "COVERS_TLS_KEY")?,
            engine: EngineOptions {
                exception_mode,
                dinner_starts_at,
                enforce_slot_cap,
                utc_offset,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, &raw)
}

fn optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key).map(|raw| parse(key, &raw)).transpose()
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}

#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 5433);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.admin_user, "admin");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
        assert!(config.tls_cert.is_none());
        assert_eq!(config.engine, EngineOptions::default());
    }

    #[test]
    fn engine_options_from_env() {
        let config = config_from(&[
            ("COVERS_EXCEPTION_MODE", "ignore"),
            ("COVERS_DINNER_STARTS_AT", "18:30"),
            ("COVERS_ENFORCE_SLOT_CAP", "true"),
            ("COVERS_UTC_OFFSET_MINUTES", "120"),
        ])
        .unwrap();
        assert_eq!(config.engine.exception_mode, ExceptionMode::Ignore);
        assert_eq!(config.engine.dinner_starts_at, SlotTime::parse("18:30").unwrap());
        assert!(config.engine.enforce_slot_cap);
        assert_eq!(config.engine.utc_offset.local_minus_utc(), 7200);
    }

    #[test]
    fn bad_values_name_their_key() {
        let err = config_from(&[("COVERS_PORT", "not-a-port")]).unwrap_err();
        assert_eq!(err.key, "COVERS_PORT");

        let err = config_from(&[("COVERS_DINNER_STARTS_AT", "5pm")]).unwrap_err();
        assert_eq!(err.key, "COVERS_DINNER_STARTS_AT");

        let err = config_from(&[("COVERS_UTC_OFFSET_MINUTES", "100000")]).unwrap_err();
        assert_eq!(err.key, "COVERS_UTC_OFFSET_MINUTES");
    }

    #[test]
    fn optional_values() {
        let config = config_from(&[
            ("COVERS_METRICS_PORT", "9090"),
            ("COVERS_TLS_CERT", "/etc/covers/cert.pem"),
        ])
        .unwrap();
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.tls_cert, Some(PathBuf::from("/etc/covers/cert.pem")));
        assert!(config.tls_key.is_none());
    }
}

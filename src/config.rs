use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::zone::ZonePolicy;

/// A `CONSULT_*` variable that is set but does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub zone: ZonePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let zone = match lookup("CONSULT_UTC_OFFSET") {
            Some(value) => ZonePolicy::parse(&value).map_err(|e| ConfigError {
                key: "CONSULT_UTC_OFFSET",
                value,
                reason: e.to_string(),
            })?,
            None => ZonePolicy::utc(),
        };
        let metrics_port = lookup("CONSULT_METRICS_PORT")
            .map(|value| parse("CONSULT_METRICS_PORT", value))
            .transpose()?;

        Ok(Self {
            port: load(&lookup, "CONSULT_PORT", 7433)?,
            bind: lookup("CONSULT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("CONSULT_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            max_connections: load(&lookup, "CONSULT_MAX_CONNECTIONS", 256)?,
            compact_threshold: load(&lookup, "CONSULT_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            zone,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("consult.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => parse(key, value),
        None => Ok(default),
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
        value,
    })
}

//! Configuration management for the client.

use lexicon_engine::ConflictPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default page size when pulling remote changes.
pub const DEFAULT_PULL_LIMIT: u32 = 100;

/// Maximum page size when pulling remote changes.
pub const MAX_PULL_LIMIT: u32 = 1000;

/// Client configuration, loaded from environment variables or built in code.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Connection pool size
    pub max_connections: u32,
    /// Delay between periodic sync passes
    pub sync_interval: Duration,
    /// Remote changes requested per page
    pub pull_limit: u32,
    /// How pending local edits compete with remote changes
    pub conflict_policy: ConflictPolicy,
    /// Rows processed between cooperative yields during hydration
    pub hydrate_yield_every: usize,
}

impl Config {
    /// Defaults for the given database file.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_connections: 4,
            sync_interval: Duration::from_secs(300),
            pull_limit: DEFAULT_PULL_LIMIT,
            conflict_policy: ConflictPolicy::default(),
            hydrate_yield_every: 256,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("LEXICON_DB_PATH").unwrap_or_else(|| "lexicon.db".to_string());
        let mut config = Self::new(db_path);

        if let Some(value) = lookup("LEXICON_MAX_CONNECTIONS") {
            config.max_connections = parse_number("LEXICON_MAX_CONNECTIONS", &value)?;
            if config.max_connections == 0 {
                return Err(ConfigError::InvalidNumber {
                    var: "LEXICON_MAX_CONNECTIONS",
                    value,
                });
            }
        }

        if let Some(value) = lookup("LEXICON_SYNC_INTERVAL_SECS") {
            let secs: u64 = parse_number("LEXICON_SYNC_INTERVAL_SECS", &value)?;
            config.sync_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(value) = lookup("LEXICON_PULL_LIMIT") {
            let limit: u32 = parse_number("LEXICON_PULL_LIMIT", &value)?;
            config.pull_limit = limit.clamp(1, MAX_PULL_LIMIT);
        }

        if let Some(value) = lookup("LEXICON_CONFLICT_POLICY") {
            config.conflict_policy = value
                .parse()
                .map_err(|_| ConfigError::InvalidPolicy(value.clone()))?;
        }

        if let Some(value) = lookup("LEXICON_HYDRATE_YIELD_EVERY") {
            let every: usize = parse_number("LEXICON_HYDRATE_YIELD_EVERY", &value)?;
            config.hydrate_yield_every = every.max(1);
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {var} value: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid LEXICON_CONFLICT_POLICY value: {0}")]
    InvalidPolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("lexicon.db"));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.pull_limit, 100);
        assert_eq!(config.conflict_policy, ConflictPolicy::RemoteAuthoritative);
        assert_eq!(config.hydrate_yield_every, 256);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("LEXICON_DB_PATH", "/tmp/words.db"),
            ("LEXICON_MAX_CONNECTIONS", "8"),
            ("LEXICON_SYNC_INTERVAL_SECS", "60"),
            ("LEXICON_CONFLICT_POLICY", "lww"),
            ("LEXICON_HYDRATE_YIELD_EVERY", "32"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/words.db"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.conflict_policy, ConflictPolicy::LastWriterWins);
        assert_eq!(config.hydrate_yield_every, 32);
    }

    #[test]
    fn pull_limit_is_clamped() {
        assert_eq!(load(&[("LEXICON_PULL_LIMIT", "0")]).unwrap().pull_limit, 1);
        assert_eq!(
            load(&[("LEXICON_PULL_LIMIT", "50000")]).unwrap().pull_limit,
            MAX_PULL_LIMIT
        );
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            load(&[("LEXICON_MAX_CONNECTIONS", "many")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            load(&[("LEXICON_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            load(&[("LEXICON_CONFLICT_POLICY", "coin-flip")]),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }
}

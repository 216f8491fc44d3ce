//! Configuration file and command-line overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working forwarder with an empty blacklist.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{EvictionPolicy, ResponseCache, TtlPolicy};
use crate::error::ConfigError;
use crate::filter::{BlacklistOptions, MembershipMode};
use crate::upstream::UdpUpstream;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Blacklist source URLs.
    pub wordlists: Vec<String>,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub blacklist: BlacklistConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub upstream: SocketAddr,
    pub upstream_timeout_ms: u64,
    pub stats_interval_secs: u64,
}

impl ServerConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5353)),
            upstream: SocketAddr::from(([8, 8, 8, 8], 53)),
            upstream_timeout_ms: UdpUpstream::DEFAULT_TIMEOUT.as_millis() as u64,
            stats_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub negative_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub eviction: EvictionPolicy,
}

impl CacheConfig {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            negative_ttl: Duration::from_secs(self.negative_ttl_secs),
            max_ttl: Duration::from_secs(self.max_ttl_secs),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: ResponseCache::DEFAULT_MAX_ENTRIES,
            negative_ttl_secs: TtlPolicy::DEFAULT_NEGATIVE_TTL.as_secs(),
            max_ttl_secs: TtlPolicy::DEFAULT_MAX_TTL.as_secs(),
            eviction: EvictionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlacklistConfig {
    pub mode: MembershipMode,
    pub expected_items: usize,
    pub false_positive_rate: f64,
    pub match_subdomains: bool,
    pub fetch_timeout_secs: u64,
}

impl BlacklistConfig {
    pub fn options(&self) -> BlacklistOptions {
        BlacklistOptions {
            mode: self.mode,
            expected_items: self.expected_items,
            false_positive_rate: self.false_positive_rate,
            match_subdomains: self.match_subdomains,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        let options = BlacklistOptions::default();
        Self {
            mode: options.mode,
            expected_items: options.expected_items,
            false_positive_rate: options.false_positive_rate,
            match_subdomains: options.match_subdomains,
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Options: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub upstream: Option<SocketAddr>,
    pub verbose: bool,
}

impl Config {
    /// Load and validate the config file, or the defaults without one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(ip) = overrides.bind {
            self.server.listen.set_ip(ip);
        }
        if let Some(port) = overrides.port {
            self.server.listen.set_port(port);
        }
        if let Some(upstream) = overrides.upstream {
            self.server.upstream = upstream;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive".into()));
        }
        if self.server.upstream_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.upstream_timeout_ms must be positive".into(),
            ));
        }
        if self.server.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.stats_interval_secs must be positive".into(),
            ));
        }
        let limit = TtlPolicy::LIMIT.as_secs();
        if self.cache.negative_ttl_secs > limit || self.cache.max_ttl_secs > limit {
            return Err(ConfigError::Invalid(format!(
                "cache TTLs must not exceed {limit} seconds"
            )));
        }
        let rate = self.blacklist.false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "blacklist.false_positive_rate must be in (0, 1), got {rate}"
            )));
        }
        Ok(())
    }
}

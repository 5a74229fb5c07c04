//! Configuration system for Meridian.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MERIDIAN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meridian/config.toml
//!   3. ~/.config/meridian/config.toml

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::subnet::{SubnetId, ATTESTATION_SUBNET_COUNT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    pub network: NetworkConfig,
    pub subnets: SubnetConfig,
    pub scoring: ScoringConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Addresses the transport listens on and that we publish in our record.
    pub listen_addrs: Vec<SocketAddr>,
    /// Subnets this node keeps peered at startup.
    pub subscribed_subnets: Vec<u8>,
    /// How often every subscribed subnet is re-checked. One epoch by default.
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetConfig {
    /// Connected peers per subnet considered adequate.
    pub target_peers_per_subnet: usize,
    /// Soft cap on peers confirmed by a single search.
    pub max_new_peers_per_search: usize,
    /// Candidates queried at most per search.
    pub max_candidate_attempts: usize,
    /// Capability queries in flight at once.
    pub query_concurrency: usize,
    /// Deadline for one capability query.
    pub query_timeout_ms: u64,
}

/// Reputation bounds and per-outcome deltas. Neutral is 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub min: i64,
    pub max: i64,
    /// Peers at or below this score are not dialed and should be dropped.
    pub disconnect_threshold: i64,
    pub valid_block: i64,
    pub invalid_block: i64,
    pub timeout: i64,
    pub protocol_violation: i64,
}

/// Simulated overlay used by the meridian-sim binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub peers: usize,
    /// Share of simulated peers that never answer capability queries.
    pub timeout_ratio: f64,
    /// Share of simulated peers whose discovery record is malformed.
    pub malformed_ratio: f64,
    /// Probability that a simulated peer serves any given subnet.
    pub subnet_density: f64,
    /// How often the simulator logs a status snapshot.
    pub report_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![SocketAddr::from(([0, 0, 0, 0], 9000))],
            subscribed_subnets: Vec::new(),
            maintenance_interval_secs: 32 * 12,
        }
    }
}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self {
            target_peers_per_subnet: 3,
            max_new_peers_per_search: 10,
            max_candidate_attempts: 16,
            query_concurrency: 4,
            query_timeout_ms: 5_000,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min: -100,
            max: 100,
            disconnect_threshold: -50,
            valid_block: 2,
            invalid_block: -10,
            timeout: -5,
            protocol_violation: -20,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 32,
            timeout_ratio: 0.1,
            malformed_ratio: 0.05,
            subnet_density: 0.15,
            report_interval_secs: 10,
        }
    }
}

impl NetworkConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Subscribed subnets, silently dropping out-of-range ids.
    /// `validate()` reports those; this accessor never fails.
    pub fn subnets(&self) -> Vec<SubnetId> {
        self.subscribed_subnets
            .iter()
            .filter_map(|&s| SubnetId::new(s))
            .collect()
    }
}

impl SimConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

impl SubnetConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl ScoringConfig {
    fn deltas(&self) -> [(&'static str, i64); 4] {
        [
            ("valid_block", self.valid_block),
            ("invalid_block", self.invalid_block),
            ("timeout", self.timeout),
            ("protocol_violation", self.protocol_violation),
        ]
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meridian")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeridianConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            MeridianConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MERIDIAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeridianConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the peer manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        if s.min > 0 || s.max < 0 || s.min >= s.max {
            return Err(ConfigError::Invalid(format!(
                "score range [{}, {}] must contain 0 and be non-empty",
                s.min, s.max
            )));
        }
        // One event must never take a neutral peer all the way to a bound.
        for (name, delta) in s.deltas() {
            if delta >= s.max || delta <= s.min {
                return Err(ConfigError::Invalid(format!(
                    "scoring.{name} = {delta} reaches a score bound in one step"
                )));
            }
        }
        if !(s.min..=s.max).contains(&s.disconnect_threshold) {
            return Err(ConfigError::Invalid(format!(
                "scoring.disconnect_threshold {} outside [{}, {}]",
                s.disconnect_threshold, s.min, s.max
            )));
        }

        let sub = &self.subnets;
        if sub.query_concurrency == 0 {
            return Err(ConfigError::Invalid("subnets.query_concurrency must be > 0".into()));
        }
        if sub.target_peers_per_subnet == 0 {
            return Err(ConfigError::Invalid(
                "subnets.target_peers_per_subnet must be > 0".into(),
            ));
        }

        if self.network.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "network.maintenance_interval_secs must be > 0".into(),
            ));
        }
        if let Some(bad) = self
            .network
            .subscribed_subnets
            .iter()
            .find(|&&s| s >= ATTESTATION_SUBNET_COUNT)
        {
            return Err(ConfigError::Invalid(format!(
                "network.subscribed_subnets contains {bad}, max is {}",
                ATTESTATION_SUBNET_COUNT - 1
            )));
        }

        let sim = &self.sim;
        for (name, ratio) in [
            ("timeout_ratio", sim.timeout_ratio),
            ("malformed_ratio", sim.malformed_ratio),
            ("subnet_density", sim.subnet_density),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid(format!("sim.{name} = {ratio} outside [0, 1]")));
            }
        }
        Ok(())
    }

    /// Apply MERIDIAN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__SUBSCRIBED_SUBNETS") {
            self.network.subscribed_subnets = parse_list(&v);
        }
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__LISTEN_ADDRS") {
            self.network.listen_addrs = parse_list(&v);
        }
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__MAINTENANCE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.network.maintenance_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_SUBNETS__TARGET_PEERS_PER_SUBNET") {
            if let Ok(n) = v.parse() {
                self.subnets.target_peers_per_subnet = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_SUBNETS__MAX_NEW_PEERS_PER_SEARCH") {
            if let Ok(n) = v.parse() {
                self.subnets.max_new_peers_per_search = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_SUBNETS__QUERY_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.subnets.query_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_SIM__PEERS") {
            if let Ok(n) = v.parse() {
                self.sim.peers = n;
            }
        }
    }
}

/// Comma-separated list; unparsable items are skipped.
fn parse_list<T: std::str::FromStr>(v: &str) -> Vec<T> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

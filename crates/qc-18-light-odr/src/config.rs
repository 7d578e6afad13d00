//! # ODR Configuration
//!
//! Configuration for the distributor, value tracker and server pool.
//!
//! Every section uses `#[serde(default)]`, so a TOML file only needs the
//! keys it wants to change.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{
    ConfigError, ServerAddress, DEFAULT_HALF_LIVES_SECS, DEFAULT_SCORE_WEIGHTS, NEUTRAL_SCORE,
};

/// Top-level ODR configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdrConfig {
    /// Request distributor settings.
    pub distributor: DistributorConfig,
    /// Value tracker settings.
    pub value_tracker: ValueTrackerConfig,
    /// Server pool settings.
    pub server_pool: ServerPoolConfig,
}

impl OdrConfig {
    /// Create a config for testing (short timeouts, deterministic pool).
    pub fn for_testing() -> Self {
        Self {
            distributor: DistributorConfig::for_testing(),
            value_tracker: ValueTrackerConfig::for_testing(),
            server_pool: ServerPoolConfig::for_testing(),
        }
    }

    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: OdrConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distributor.validate()?;
        self.value_tracker.validate()?;
        self.server_pool.validate()?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Request distributor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// Per-attempt timeout for peers without latency history.
    pub default_timeout_ms: u64,
    /// Lower bound of the adaptive per-attempt timeout.
    pub min_timeout_ms: u64,
    /// Multiple of the expected latency allowed before an attempt times out.
    pub timeout_latency_factor: f64,
    /// Deadline applied by `retrieve` when the caller passes none.
    pub default_deadline_ms: u64,
    /// Per-peer cap on in-flight requests.
    pub max_in_flight_per_peer: usize,
    /// Latency at which a valid response is worth half its cost.
    pub reference_latency_ms: u64,
    /// Cost multiplier charged for an invalid response.
    pub invalid_response_penalty: f64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            min_timeout_ms: 250,
            timeout_latency_factor: 3.0,
            default_deadline_ms: 60_000,
            max_in_flight_per_peer: 16,
            reference_latency_ms: 500,
            invalid_response_penalty: 2.0,
        }
    }
}

impl DistributorConfig {
    /// Create a config for testing (short timeouts).
    pub fn for_testing() -> Self {
        Self {
            default_timeout_ms: 200,
            min_timeout_ms: 20,
            default_deadline_ms: 2_000,
            max_in_flight_per_peer: 4,
            ..Self::default()
        }
    }

    /// Per-attempt timeout without history.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Lower bound of the adaptive timeout.
    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    /// Default retrieval deadline.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Reference latency for response quality.
    pub fn reference_latency(&self) -> Duration {
        Duration::from_millis(self.reference_latency_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(invalid("distributor.default_timeout_ms", "must be positive"));
        }
        if self.min_timeout_ms > self.default_timeout_ms {
            return Err(invalid(
                "distributor.min_timeout_ms",
                "must not exceed default_timeout_ms",
            ));
        }
        if !(self.timeout_latency_factor >= 1.0) {
            return Err(invalid("distributor.timeout_latency_factor", "must be >= 1"));
        }
        if self.max_in_flight_per_peer == 0 {
            return Err(invalid("distributor.max_in_flight_per_peer", "must be positive"));
        }
        if !(self.invalid_response_penalty >= 1.0) {
            return Err(invalid("distributor.invalid_response_penalty", "must be >= 1"));
        }
        Ok(())
    }
}

/// Value tracker configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueTrackerConfig {
    /// Accumulator half-lives, shortest first.
    pub half_lives_secs: Vec<u64>,
    /// Combination weights, paired with `half_lives_secs`.
    pub weights: Vec<f64>,
    /// Score of a peer with no history.
    pub prior_score: f64,
    /// Pseudo-cost units backing the prior.
    pub prior_weight: f64,
    /// Half-life of the response latency estimate.
    pub latency_half_life_secs: u64,
    /// Minimum age before an active entry is written back on update.
    pub update_interval_secs: u64,
}

impl Default for ValueTrackerConfig {
    fn default() -> Self {
        Self {
            half_lives_secs: DEFAULT_HALF_LIVES_SECS.to_vec(),
            weights: DEFAULT_SCORE_WEIGHTS.to_vec(),
            prior_score: NEUTRAL_SCORE,
            prior_weight: 1_000.0,
            latency_half_life_secs: 3_600,
            update_interval_secs: 60,
        }
    }
}

impl ValueTrackerConfig {
    /// Create a config for testing (light prior so single updates show).
    pub fn for_testing() -> Self {
        Self {
            prior_weight: 100.0,
            ..Self::default()
        }
    }

    /// Half-lives as durations.
    pub fn half_lives(&self) -> Vec<Duration> {
        self.half_lives_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    /// Latency half-life as a duration.
    pub fn latency_half_life(&self) -> Duration {
        Duration::from_secs(self.latency_half_life_secs)
    }

    /// Write-back interval as a duration.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.half_lives_secs.is_empty() {
            return Err(invalid("value_tracker.half_lives_secs", "must not be empty"));
        }
        if self.half_lives_secs.contains(&0) {
            return Err(invalid("value_tracker.half_lives_secs", "must be positive"));
        }
        if !self.half_lives_secs.windows(2).all(|w| w[0] < w[1]) {
            return Err(invalid(
                "value_tracker.half_lives_secs",
                "must be strictly increasing",
            ));
        }
        if self.weights.len() != self.half_lives_secs.len() {
            return Err(invalid(
                "value_tracker.weights",
                format!("expected {} weights", self.half_lives_secs.len()),
            ));
        }
        if self.weights.iter().any(|w| !(*w >= 0.0)) || self.weights.iter().sum::<f64>() <= 0.0 {
            return Err(invalid("value_tracker.weights", "must be non-negative, not all zero"));
        }
        if !(0.0..=1.0).contains(&self.prior_score) {
            return Err(invalid("value_tracker.prior_score", "must be within [0, 1]"));
        }
        if !(self.prior_weight > 0.0) {
            return Err(invalid("value_tracker.prior_weight", "must be positive"));
        }
        if self.latency_half_life_secs == 0 {
            return Err(invalid("value_tracker.latency_half_life_secs", "must be positive"));
        }
        Ok(())
    }
}

/// Server pool configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerPoolConfig {
    /// Desired number of simultaneous server connections.
    pub target_connections: usize,
    /// Maximum dials in progress at once.
    pub max_dialing: usize,
    /// Fraction of slots reserved for never-connected candidates.
    pub explore_fraction: f64,
    /// First dial backoff step.
    pub dial_backoff_base_ms: u64,
    /// Dial backoff ceiling.
    pub dial_backoff_max_ms: u64,
    /// Interval between maintenance passes of the dial loop.
    pub maintain_interval_ms: u64,
    /// Candidates pulled from discovery per maintenance pass.
    pub discovery_batch: usize,
    /// How long one discovery pull may wait.
    pub discovery_wait_ms: u64,
    /// Connections scoring below this may be dropped under pressure.
    pub eviction_threshold: f64,
    /// Connections younger than this are never evicted.
    pub min_session_secs: u64,
    /// Upper bound on remembered candidates.
    pub max_known_candidates: usize,
    /// Trusted servers (`<hex id>@<host:port>`), always dialed, never evicted.
    pub trusted_servers: Vec<String>,
    /// Seed for exploration sampling; random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for ServerPoolConfig {
    fn default() -> Self {
        Self {
            target_connections: 8,
            max_dialing: 4,
            explore_fraction: 0.25,
            dial_backoff_base_ms: 5_000,
            dial_backoff_max_ms: 30 * 60 * 1_000,
            maintain_interval_ms: 1_000,
            discovery_batch: 8,
            discovery_wait_ms: 100,
            eviction_threshold: 0.2,
            min_session_secs: 60,
            max_known_candidates: 2_000,
            trusted_servers: Vec::new(),
            rng_seed: None,
        }
    }
}

impl ServerPoolConfig {
    /// Create a config for testing (fast loop, fixed seed).
    pub fn for_testing() -> Self {
        Self {
            target_connections: 3,
            max_dialing: 2,
            dial_backoff_base_ms: 100,
            dial_backoff_max_ms: 1_000,
            maintain_interval_ms: 10,
            discovery_wait_ms: 5,
            min_session_secs: 0,
            max_known_candidates: 64,
            rng_seed: Some(7),
            ..Self::default()
        }
    }

    /// Parsed trusted server addresses.
    pub fn trusted_addresses(&self) -> Result<Vec<ServerAddress>, ConfigError> {
        self.trusted_servers
            .iter()
            .map(|s| {
                s.parse::<ServerAddress>()
                    .map_err(|e| invalid("server_pool.trusted_servers", e))
            })
            .collect()
    }

    /// Number of connection slots reserved for exploration.
    pub fn explore_slots(&self) -> usize {
        (self.target_connections as f64 * self.explore_fraction).round() as usize
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target_connections == 0 {
            return Err(invalid("server_pool.target_connections", "must be positive"));
        }
        if self.max_dialing == 0 {
            return Err(invalid("server_pool.max_dialing", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.explore_fraction) {
            return Err(invalid("server_pool.explore_fraction", "must be within [0, 1]"));
        }
        if self.dial_backoff_base_ms > self.dial_backoff_max_ms {
            return Err(invalid(
                "server_pool.dial_backoff_base_ms",
                "must not exceed dial_backoff_max_ms",
            ));
        }
        if self.maintain_interval_ms == 0 {
            return Err(invalid("server_pool.maintain_interval_ms", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.eviction_threshold) {
            return Err(invalid("server_pool.eviction_threshold", "must be within [0, 1]"));
        }
        self.trusted_addresses()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PeerId;

    #[test]
    fn test_default_config_is_valid() {
        let config = OdrConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.value_tracker.half_lives_secs, vec![3_600, 360_000, 3_600_000]);
        assert_eq!(config.server_pool.explore_slots(), 2);
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(OdrConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = OdrConfig::from_toml_str(
            r#"
            [distributor]
            default_timeout_ms = 5000

            [server_pool]
            explore_fraction = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.distributor.default_timeout_ms, 5_000);
        assert_eq!(config.distributor.min_timeout_ms, 250);
        assert_eq!(config.server_pool.explore_fraction, 0.5);
    }

    #[test]
    fn test_rejects_mismatched_weights() {
        let err = OdrConfig::from_toml_str(
            r#"
            [value_tracker]
            half_lives_secs = [60, 600]
            weights = [1.0]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "value_tracker.weights", .. }));
    }

    #[test]
    fn test_rejects_bad_explore_fraction() {
        let mut config = OdrConfig::default();
        config.server_pool.explore_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trusted_servers_parse() {
        let mut config = ServerPoolConfig::default();
        config.trusted_servers = vec![format!("{}@10.0.0.1:30303", PeerId::new([3; 32]))];
        let trusted = config.trusted_addresses().unwrap();
        assert_eq!(trusted[0].id, PeerId::new([3; 32]));

        config.trusted_servers.push("garbage".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            OdrConfig::from_toml_str("[distributor"),
            Err(ConfigError::Parse(_))
        ));
    }
}

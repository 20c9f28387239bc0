//! Engine configuration schema.
//!
//! An `EngineConfig` is deserialized from TOML. Every field has a default,
//! so an empty document is a valid configuration with enforcement on.
//!
//! Example:
//! ```toml
//! policy_version = "2024-06-01"
//! decision_threshold = 0.7
//! circuit_open_risk = 0.0
//! check_timeout_ms = 200
//!
//! [enforcement]
//! enabled = true
//!
//! [breaker]
//! failure_threshold = 5
//! window_secs = 60
//! cooldown_secs = 30
//! half_open_trial_budget = 1
//!
//! [checks.ethics]
//! failure_threshold = 3
//! timeout_ms = 500
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use guardian_contracts::error::{GuardianError, GuardianResult};

/// Whether the engine enforces checks at all.
///
/// Disabling enforcement makes every decision `allowed` with reason
/// `enforcement_disabled`. Those decisions are still audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Circuit breaker tuning for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Failures inside the window that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Length of the rolling failure window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long the breaker stays open before admitting trials.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Trial calls admitted in the half-open state.
    #[serde(default = "default_trial_budget")]
    pub half_open_trial_budget: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            half_open_trial_budget: default_trial_budget(),
        }
    }
}

impl BreakerSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Per-check overrides under `[checks.<name>]`. Unset fields fall back to
/// the engine-wide values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOverrides {
    pub failure_threshold: Option<u32>,
    pub window_secs: Option<u64>,
    pub cooldown_secs: Option<u64>,
    pub half_open_trial_budget: Option<u32>,
    pub timeout_ms: Option<u64>,
}

/// The top-level structure deserialized from an engine TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stamped on every decision.
    #[serde(default = "default_policy_version")]
    pub policy_version: String,

    /// A request is allowed only while `risk_final` is strictly below this.
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,

    /// Risk contributed by a check skipped because its breaker is open.
    ///
    /// `0.0` means an open breaker trusts the remaining checks
    /// (fail-open for availability); `1.0` denies whenever any required
    /// check's breaker is open.
    #[serde(default)]
    pub circuit_open_risk: f64,

    /// Per-check invocation deadline.
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    #[serde(default)]
    pub enforcement: EnforcementPolicy,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub checks: BTreeMap<String, CheckOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy_version: default_policy_version(),
            decision_threshold: default_decision_threshold(),
            circuit_open_risk: 0.0,
            check_timeout_ms: default_check_timeout_ms(),
            enforcement: EnforcementPolicy::default(),
            breaker: BreakerSettings::default(),
            checks: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `GuardianError::ConfigError` if the TOML is malformed, does not
    /// match the schema, or carries out-of-range values.
    pub fn from_toml_str(s: &str) -> GuardianResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| GuardianError::ConfigError {
            reason: format!("failed to parse engine TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as engine configuration.
    pub fn from_file(path: &Path) -> GuardianResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| GuardianError::ConfigError {
            reason: format!("failed to read engine config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> GuardianResult<()> {
        check_unit("decision_threshold", self.decision_threshold)?;
        check_unit("circuit_open_risk", self.circuit_open_risk)?;
        if self.check_timeout_ms == 0 {
            return Err(config_error("check_timeout_ms must be greater than zero"));
        }
        check_breaker("[breaker]", &self.breaker)?;

        for name in self.checks.keys() {
            check_breaker(&format!("[checks.{}]", name), &self.breaker_for(name))?;
            if self.check_timeout(name).is_zero() {
                return Err(config_error(format!("[checks.{}] timeout_ms must be greater than zero", name)));
            }
        }
        Ok(())
    }

    /// Breaker settings for `check`, with any overrides applied.
    pub fn breaker_for(&self, check: &str) -> BreakerSettings {
        let base = self.breaker;
        match self.checks.get(check) {
            Some(o) => BreakerSettings {
                failure_threshold: o.failure_threshold.unwrap_or(base.failure_threshold),
                window_secs: o.window_secs.unwrap_or(base.window_secs),
                cooldown_secs: o.cooldown_secs.unwrap_or(base.cooldown_secs),
                half_open_trial_budget: o.half_open_trial_budget.unwrap_or(base.half_open_trial_budget),
            },
            None => base,
        }
    }

    /// Invocation deadline for `check`.
    pub fn check_timeout(&self, check: &str) -> Duration {
        let ms = self
            .checks
            .get(check)
            .and_then(|o| o.timeout_ms)
            .unwrap_or(self.check_timeout_ms);
        Duration::from_millis(ms)
    }
}

fn check_unit(field: &str, value: f64) -> GuardianResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(config_error(format!("{} must be within [0, 1], got {}", field, value)))
    }
}

fn check_breaker(section: &str, b: &BreakerSettings) -> GuardianResult<()> {
    if b.failure_threshold == 0 {
        return Err(config_error(format!("{} failure_threshold must be at least 1", section)));
    }
    if b.half_open_trial_budget == 0 {
        return Err(config_error(format!("{} half_open_trial_budget must be at least 1", section)));
    }
    if b.window_secs == 0 {
        return Err(config_error(format!("{} window_secs must be at least 1", section)));
    }
    Ok(())
}

fn config_error(reason: impl Into<String>) -> GuardianError {
    GuardianError::ConfigError { reason: reason.into() }
}

fn default_enabled() -> bool {
    true
}

fn default_policy_version() -> String {
    "unversioned".to_string()
}

fn default_decision_threshold() -> f64 {
    0.7
}

fn default_check_timeout_ms() -> u64 {
    200
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_trial_budget() -> u32 {
    1
}

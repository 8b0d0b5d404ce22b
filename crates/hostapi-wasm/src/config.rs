//! Binding-layer configuration (§4.8): the knobs that belong to the sandbox
//! binding's own operation, not to any one guest's `Config` snapshot —
//! the staleness-sweep interval, the WASM engine's fuel/epoch policy, and
//! log verbosity. Deserialized from an embedder-supplied record the same
//! way the dispatch core's `Config` is layered: defaults, then overrides,
//! validated eagerly and never partially applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fuel and epoch-interruption policy for a single guest instantiation.
/// `fuel_limit: 0` means unmetered; `epoch_ticks: 0` means no wall-clock
/// interruption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnginePolicy {
    #[serde(default)]
    pub fuel_limit: u64,
    #[serde(default)]
    pub epoch_ticks: u64,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            fuel_limit: 0,
            epoch_ticks: 0,
        }
    }
}

/// Log verbosity understood by the binding's own `tracing` setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogVerbosity {
    fn default() -> Self {
        LogVerbosity::Info
    }
}

impl LogVerbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            LogVerbosity::Trace => "trace",
            LogVerbosity::Debug => "debug",
            LogVerbosity::Info => "info",
            LogVerbosity::Warn => "warn",
            LogVerbosity::Error => "error",
        }
    }
}

/// Typed, validated configuration for the sandbox binding itself (§4.8).
/// Distinct from [`hostapi_core::Config`], which is the per-guest capability
/// snapshot the dispatch core consumes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingConfig {
    #[serde(default = "BindingConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub engine_policy: EnginePolicy,
    #[serde(default)]
    pub log_verbosity: LogVerbosity,
}

impl BindingConfig {
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    fn default_sweep_interval_secs() -> u64 {
        Self::DEFAULT_SWEEP_INTERVAL.as_secs()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject configurations that would silently disable the staleness
    /// sweep or otherwise misconfigure the engine, rather than let a zero
    /// value propagate into a busy-loop or a permanently-unmetered guest.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_secs == 0 {
            return Err("sweepIntervalSecs must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: Self::default_sweep_interval_secs(),
            engine_policy: EnginePolicy::default(),
            log_verbosity: LogVerbosity::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(BindingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = BindingConfig::default();
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_from_partial_record_with_defaults() {
        let config: BindingConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.sweep_interval_secs, BindingConfig::DEFAULT_SWEEP_INTERVAL.as_secs());
        assert_eq!(config.log_verbosity, LogVerbosity::Info);
    }

    #[test]
    fn deserializes_overrides() {
        let config: BindingConfig = serde_json::from_value(serde_json::json!({
            "sweepIntervalSecs": 30,
            "enginePolicy": {"fuelLimit": 1_000_000, "epochTicks": 10},
            "logVerbosity": "debug",
        }))
        .unwrap();
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.engine_policy.fuel_limit, 1_000_000);
        assert_eq!(config.log_verbosity, LogVerbosity::Debug);
    }
}

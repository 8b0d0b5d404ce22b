//! The immutable configuration snapshot handed to a capability set at
//! creation time (§3, §6).

use std::sync::Arc;

use crate::observability::Telemetry;
use crate::policy::PolicyEngine;

/// Resource limits enforced by the capability set. A `0` value in the
/// embedder-supplied record substitutes the corresponding default (§4.1);
/// callers should go through [`Limits::from_overrides`] rather than
/// constructing this directly, so that substitution rule is applied
/// uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_iterators_per_service: usize,
    pub iterator_timeout: std::time::Duration,
    pub max_request_size: usize,
    pub max_response_size: usize,
}

impl Limits {
    pub const DEFAULT_MAX_ITERATORS_PER_SERVICE: usize = 100;
    pub const DEFAULT_ITERATOR_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);
    pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;
    pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

    /// Build limits from embedder-supplied overrides, substituting the fixed
    /// default for any field left at zero.
    pub fn from_overrides(
        max_iterators_per_service: usize,
        iterator_timeout: std::time::Duration,
        max_request_size: usize,
        max_response_size: usize,
    ) -> Self {
        Self {
            max_iterators_per_service: if max_iterators_per_service == 0 {
                Self::DEFAULT_MAX_ITERATORS_PER_SERVICE
            } else {
                max_iterators_per_service
            },
            iterator_timeout: if iterator_timeout.is_zero() {
                Self::DEFAULT_ITERATOR_TIMEOUT
            } else {
                iterator_timeout
            },
            max_request_size: if max_request_size == 0 {
                Self::DEFAULT_MAX_REQUEST_SIZE
            } else {
                max_request_size
            },
            max_response_size: if max_response_size == 0 {
                Self::DEFAULT_MAX_RESPONSE_SIZE
            } else {
                max_response_size
            },
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_overrides(0, std::time::Duration::ZERO, 0, 0)
    }
}

/// The per-set configuration snapshot: identity, environment, the injected
/// policy engine and telemetry facade, service-specific opaque config, and
/// resource limits. Immutable for the lifetime of the set it was created
/// with (§3).
#[derive(Clone)]
pub struct Config {
    service_name: Arc<str>,
    service_version: Arc<str>,
    environment: Arc<str>,
    policy_engine: Arc<dyn PolicyEngine>,
    telemetry: Telemetry,
    opaque_config: serde_json::Value,
    limits: Limits,
}

impl Config {
    pub fn builder(
        service_name: impl Into<Arc<str>>,
        service_version: impl Into<Arc<str>>,
        policy_engine: Arc<dyn PolicyEngine>,
    ) -> ConfigBuilder {
        ConfigBuilder::new(service_name, service_version, policy_engine)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn policy_engine(&self) -> &Arc<dyn PolicyEngine> {
        &self.policy_engine
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn opaque_config(&self) -> &serde_json::Value {
        &self.opaque_config
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }
}

/// Builder for [`Config`], following the same "construct defaults, override
/// incrementally" shape used throughout the capability and registry APIs.
pub struct ConfigBuilder {
    service_name: Arc<str>,
    service_version: Arc<str>,
    environment: Arc<str>,
    policy_engine: Arc<dyn PolicyEngine>,
    telemetry: Telemetry,
    opaque_config: serde_json::Value,
    limits: Limits,
}

impl ConfigBuilder {
    pub fn new(
        service_name: impl Into<Arc<str>>,
        service_version: impl Into<Arc<str>>,
        policy_engine: Arc<dyn PolicyEngine>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            environment: Arc::from("production"),
            policy_engine,
            telemetry: Telemetry::noop(),
            opaque_config: serde_json::Value::Null,
            limits: Limits::default(),
        }
    }

    pub fn environment(mut self, environment: impl Into<Arc<str>>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn opaque_config(mut self, opaque_config: serde_json::Value) -> Self {
        self.opaque_config = opaque_config;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Config {
        Config {
            service_name: self.service_name,
            service_version: self.service_version,
            environment: self.environment,
            policy_engine: self.policy_engine,
            telemetry: self.telemetry,
            opaque_config: self.opaque_config,
            limits: self.limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllowAllPolicy;

    #[test]
    fn zero_overrides_substitute_defaults() {
        let limits = Limits::from_overrides(0, std::time::Duration::ZERO, 0, 0);
        assert_eq!(limits.max_iterators_per_service, Limits::DEFAULT_MAX_ITERATORS_PER_SERVICE);
        assert_eq!(limits.iterator_timeout, Limits::DEFAULT_ITERATOR_TIMEOUT);
        assert_eq!(limits.max_request_size, Limits::DEFAULT_MAX_REQUEST_SIZE);
        assert_eq!(limits.max_response_size, Limits::DEFAULT_MAX_RESPONSE_SIZE);
    }

    #[test]
    fn non_zero_overrides_are_kept() {
        let limits = Limits::from_overrides(2, std::time::Duration::from_millis(100), 1024, 2048);
        assert_eq!(limits.max_iterators_per_service, 2);
        assert_eq!(limits.iterator_timeout, std::time::Duration::from_millis(100));
        assert_eq!(limits.max_request_size, 1024);
        assert_eq!(limits.max_response_size, 2048);
    }

    #[test]
    fn builder_produces_expected_config() {
        let config = Config::builder("svc", "1.0.0", Arc::new(AllowAllPolicy))
            .environment("staging")
            .build();
        assert_eq!(config.service_name(), "svc");
        assert_eq!(config.environment(), "staging");
    }
}

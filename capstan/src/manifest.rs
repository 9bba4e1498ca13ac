use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceLimits;

/// Immutable description of one application managed by an engine.
///
/// The manifest names the application, fixes its execution policy and
/// carries the opaque resource limits that are forwarded to the
/// [`ResourceController`](crate::resource::ResourceController) at engine
/// construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    /// Application name; also names the bus endpoint and the control group.
    pub name: String,
    /// Scheduling and pool-elasticity policy.
    pub policy: ExecutionPolicy,
    /// Typed limits handed to the resource-limit facility, keyed by
    /// controller and parameter name.
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

/// Queue and pool policy for one application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Maximum number of jobs admitted to the queue.
    pub queue_limit: usize,
    /// Maximum number of workers in the pool.
    pub pool_limit: usize,
    /// Hysteresis factor for pool growth; the pool grows only while
    /// `pool * grow_threshold < queue * 2`.
    pub grow_threshold: usize,
    /// Liveness deadline between heartbeats of an established worker.
    pub heartbeat_timeout: Duration,
    /// Liveness deadline for a freshly spawned worker.
    pub startup_timeout: Duration,
    /// How long `stop()` waits for the loop to wind down.
    pub termination_timeout: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            queue_limit: 100,
            pool_limit: 10,
            grow_threshold: 10,
            heartbeat_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(10),
            termination_timeout: Duration::from_secs(5),
        }
    }
}

impl Manifest {
    /// Create a manifest with the default execution policy and no
    /// resource limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: ExecutionPolicy::default(),
            resource_limits: ResourceLimits::default(),
        }
    }

    /// Replace the execution policy.
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the resource limits.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Validate the manifest before an engine is built around it.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is empty or any policy field that
    /// must be positive is zero. `grow_threshold = 0` in particular would
    /// leave the growth expression undefined.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("application name must not be empty");
        }
        if self.policy.queue_limit == 0 {
            anyhow::bail!("queue limit must be positive");
        }
        if self.policy.pool_limit == 0 {
            anyhow::bail!("pool limit must be positive");
        }
        if self.policy.grow_threshold == 0 {
            anyhow::bail!("grow threshold must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::LimitValue;

    #[test]
    fn test_default_policy_is_valid() {
        let manifest = Manifest::new("echo");
        manifest.validate().expect("default manifest should validate");
    }

    #[test]
    fn test_empty_name_rejected() {
        let manifest = Manifest::new("");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_zero_grow_threshold_rejected() {
        let mut manifest = Manifest::new("echo");
        manifest.policy.grow_threshold = 0;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("grow threshold"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut manifest = Manifest::new("echo");
        manifest.policy.queue_limit = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = Manifest::new("echo");
        manifest.policy.pool_limit = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_json_round_trip() {
        let mut limits = ResourceLimits::default();
        limits
            .controller_mut("memory")
            .insert("limit_in_bytes".into(), LimitValue::Unsigned(1 << 30));
        limits
            .controller_mut("cpuset")
            .insert("cpus".into(), LimitValue::String("0-3".into()));

        let manifest = Manifest::new("echo").with_resource_limits(limits);
        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();

        assert_eq!(back.name, "echo");
        assert_eq!(back.policy.queue_limit, manifest.policy.queue_limit);
        assert_eq!(
            back.resource_limits.controller("memory").unwrap()["limit_in_bytes"],
            LimitValue::Unsigned(1 << 30)
        );
    }
}

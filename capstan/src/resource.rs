use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One typed parameter value for the resource-limit facility.
///
/// The wire format is untagged: JSON strings, signed integers, unsigned
/// integers and booleans map directly onto the variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitValue {
    /// Boolean switch, e.g. `memory.use_hierarchy`.
    Bool(bool),
    /// Unsigned quantity, e.g. `memory.limit_in_bytes`.
    Unsigned(u64),
    /// Signed quantity, e.g. `memory.swappiness` adjustments.
    Int(i64),
    /// Free-form value, e.g. `cpuset.cpus`.
    String(String),
}

/// Limits grouped by controller name, then by parameter name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(flatten)]
    controllers: HashMap<String, HashMap<String, LimitValue>>,
}

impl ResourceLimits {
    /// True when no controller carries any parameter.
    pub fn is_empty(&self) -> bool {
        self.controllers.values().all(HashMap::is_empty)
    }

    /// Parameters of one controller, if present.
    pub fn controller(&self, name: &str) -> Option<&HashMap<String, LimitValue>> {
        self.controllers.get(name)
    }

    /// Get or create the parameter map of one controller.
    pub fn controller_mut(&mut self, name: &str) -> &mut HashMap<String, LimitValue> {
        self.controllers.entry(name.to_string()).or_default()
    }

    /// Iterate over `(controller, parameters)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashMap<String, LimitValue>)> {
        self.controllers.iter().map(|(name, params)| (name.as_str(), params))
    }
}

/// Capability object that applies resource limits to an application's
/// worker processes.
///
/// The engine calls `setup` once at construction and `teardown` once on
/// drop. Both are best-effort: failures are logged by the engine and never
/// propagate. Teardown in particular may fail transiently while workers
/// are still terminating.
pub trait ResourceController: Send + Sync {
    /// Create the control scope for `app` and apply `limits` to it.
    fn setup(&self, app: &str, limits: &ResourceLimits) -> anyhow::Result<()>;

    /// Remove the control scope for `app`.
    fn teardown(&self, app: &str) -> anyhow::Result<()>;
}

/// The default controller: accepts any configuration and does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullController;

impl ResourceController for NullController {
    fn setup(&self, app: &str, limits: &ResourceLimits) -> anyhow::Result<()> {
        if !limits.is_empty() {
            tracing::debug!(app, "resource limits configured but no controller is active");
        }
        Ok(())
    }

    fn teardown(&self, _app: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

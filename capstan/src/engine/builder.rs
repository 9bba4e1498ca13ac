use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::bus::Bus;
use crate::manifest::Manifest;
use crate::resource::{NullController, ResourceController};

use super::pool::WorkerFactory;
use super::{Engine, EngineConfig};

/// Builder for constructing an [`Engine`] with explicit collaborators.
///
/// The bus and the worker factory are required; the reactor config and the
/// resource controller default to [`EngineConfig::default`] and
/// [`NullController`].
///
/// # Example
///
/// ```ignore
/// let engine = Engine::builder(manifest)
///     .with_bus(bus)
///     .with_factory(factory)
///     .build()?;
/// ```
pub struct EngineBuilder<B: Bus, F: WorkerFactory> {
    manifest: Manifest,
    config: EngineConfig,
    bus: Option<Arc<B>>,
    factory: Option<Arc<F>>,
    limits: Option<Arc<dyn ResourceController>>,
}

impl<B: Bus, F: WorkerFactory> EngineBuilder<B, F> {
    /// Create a builder around the given manifest.
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            config: EngineConfig::default(),
            bus: None,
            factory: None,
            limits: None,
        }
    }

    /// Override the reactor tuning knobs.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bus transport.
    pub fn with_bus(mut self, bus: Arc<B>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the worker factory.
    pub fn with_factory(mut self, factory: Arc<F>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the resource-limit controller.
    pub fn with_resource_controller(mut self, limits: Arc<dyn ResourceController>) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns an error when a required collaborator is missing or the
    /// manifest fails validation.
    pub fn build(self) -> anyhow::Result<Engine<B, F>> {
        let bus = self
            .bus
            .ok_or_else(|| anyhow::anyhow!("bus dependency missing"))?;
        let factory = self
            .factory
            .ok_or_else(|| anyhow::anyhow!("worker factory dependency missing"))?;
        let limits = self
            .limits
            .unwrap_or_else(|| Arc::new(NullController) as Arc<dyn ResourceController>);

        Engine::new(self.manifest, self.config, bus, factory, limits)
    }
}

impl<B: Bus, F: WorkerFactory> fmt::Debug for EngineBuilder<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("EngineBuilder");
        debug.field("app", &self.manifest.name);
        debug.field("bus_set", &self.bus.is_some());
        debug.field("factory_set", &self.factory.is_some());
        debug.field("limits_set", &self.limits.is_some());

        if self.bus.is_some() {
            debug.field("bus_type", &type_name::<B>());
        }
        if self.factory.is_some() {
            debug.field("factory_type", &type_name::<F>());
        }

        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::protocol::{EngineCommand, Envelope};
    use crate::worker::WorkerId;

    struct NoopBus;

    #[async_trait]
    impl Bus for NoopBus {
        async fn recv(&self) -> anyhow::Result<Envelope> {
            std::future::pending().await
        }

        fn try_recv(&self) -> anyhow::Result<Option<Envelope>> {
            Ok(None)
        }

        fn send(&self, _to: &WorkerId, _command: &EngineCommand) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopFactory;

    impl WorkerFactory for NoopFactory {
        fn spawn(&self) -> anyhow::Result<WorkerId> {
            Ok(WorkerId::new())
        }
    }

    #[test]
    fn test_missing_bus_rejected() {
        let err = EngineBuilder::<NoopBus, NoopFactory>::new(Manifest::new("echo"))
            .with_factory(Arc::new(NoopFactory))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("bus dependency missing"));
    }

    #[test]
    fn test_missing_factory_rejected() {
        let err = EngineBuilder::<NoopBus, NoopFactory>::new(Manifest::new("echo"))
            .with_bus(Arc::new(NoopBus))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("factory dependency missing"));
    }

    #[test]
    fn test_invalid_manifest_rejected() {
        let mut manifest = Manifest::new("echo");
        manifest.policy.grow_threshold = 0;
        let err = EngineBuilder::<NoopBus, NoopFactory>::new(manifest)
            .with_bus(Arc::new(NoopBus))
            .with_factory(Arc::new(NoopFactory))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("grow threshold"));
    }

    #[test]
    fn test_defaults_fill_config_and_limits() {
        let engine = EngineBuilder::<NoopBus, NoopFactory>::new(Manifest::new("echo"))
            .with_bus(Arc::new(NoopBus))
            .with_factory(Arc::new(NoopFactory))
            .build()
            .expect("defaults suffice");
        assert_eq!(engine.manifest().name, "echo");
    }
}

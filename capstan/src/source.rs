//! Data-source plugin surface.
//!
//! Plugins feed the host process with input data; the engine core never
//! touches them. A plugin registers one factory per URI scheme, and each
//! factory turns a URI into a [`Source`] handle the host polls with
//! [`Source::fetch`] until it signals exhaustion.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One batch of fetched data.
pub type SourceRecord = HashMap<String, String>;

/// Why a fetch produced no data.
#[derive(Debug)]
pub enum SourceError {
    /// The source has permanently run dry; the host stops polling it.
    Exhausted,
    /// A transient failure; the host may poll again.
    Failed(anyhow::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Exhausted => write!(f, "the source is exhausted"),
            SourceError::Failed(e) => write!(f, "fetch failed: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A handle produced by a source factory for one URI.
pub trait Source: Send {
    /// The URI this source was created from.
    fn uri(&self) -> &str;

    /// Fetch the next batch of data.
    ///
    /// # Errors
    ///
    /// [`SourceError::Exhausted`] is terminal; anything else is
    /// transient.
    fn fetch(&mut self) -> Result<SourceRecord, SourceError>;
}

/// Factory turning a URI into a source; registered per scheme.
pub type SourceFactory = Arc<dyn Fn(&str) -> anyhow::Result<Box<dyn Source>> + Send + Sync>;

/// Scheme-keyed registry the host populates from plugin entry points.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `scheme`, replacing any previous one.
    pub fn register(&mut self, scheme: impl Into<String>, factory: SourceFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    /// Registered schemes, for diagnostics.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a source for `uri`, dispatching on its scheme.
    ///
    /// # Errors
    ///
    /// Fails when the URI has no `scheme://` prefix, the scheme is
    /// unregistered, or the factory itself fails.
    pub fn create(&self, uri: &str) -> anyhow::Result<Box<dyn Source>> {
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| anyhow::anyhow!("uri '{uri}' has no scheme"))?;
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| anyhow::anyhow!("no source plugin for scheme '{scheme}'"))?;
        factory(uri)
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountdownSource {
        uri: String,
        remaining: usize,
    }

    impl Source for CountdownSource {
        fn uri(&self) -> &str {
            &self.uri
        }

        fn fetch(&mut self) -> Result<SourceRecord, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Exhausted);
            }
            self.remaining -= 1;
            let mut record = SourceRecord::new();
            record.insert("remaining".into(), self.remaining.to_string());
            Ok(record)
        }
    }

    fn registry() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(
            "countdown",
            Arc::new(|uri: &str| {
                Ok(Box::new(CountdownSource {
                    uri: uri.to_string(),
                    remaining: 2,
                }) as Box<dyn Source>)
            }),
        );
        registry
    }

    #[test]
    fn test_create_dispatches_on_scheme() {
        let registry = registry();
        let source = registry.create("countdown://start").unwrap();
        assert_eq!(source.uri(), "countdown://start");
    }

    #[test]
    fn test_fetch_until_exhausted() {
        let registry = registry();
        let mut source = registry.create("countdown://start").unwrap();

        assert_eq!(source.fetch().unwrap()["remaining"], "1");
        assert_eq!(source.fetch().unwrap()["remaining"], "0");
        assert!(matches!(source.fetch(), Err(SourceError::Exhausted)));
    }

    #[test]
    fn test_unknown_scheme_and_missing_scheme_rejected() {
        let registry = registry();
        assert!(registry.create("ftp://nope").is_err());
        assert!(registry.create("no-scheme-here").is_err());
    }
}

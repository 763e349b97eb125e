//! Plugin loader - configured names to linked capability providers.
//!
//! The original deployment dlopen'ed one shared object per configured
//! plugin name. Here the providers are linked into the binary and register
//! a factory under their plugin name; the loader resolves the configured
//! list against that table. A name with no provider is logged and skipped:
//! one bad plugin never aborts startup.

use tracing::{debug, error};

use super::{Handler, HandlerRegistry};

/// Factory yielding one handler instance, the linked counterpart of the
/// old per-plugin `create_t` symbol.
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Process-wide registry of linked capability providers.
#[derive(Default)]
pub struct PluginLoader {
    providers: Vec<(String, HandlerFactory)>,
}

impl PluginLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its plugin name.
    pub fn provide(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    ) -> Self {
        self.providers.push((name.into(), Box::new(factory)));
        self
    }

    /// Build a registry from the configured plugin list, in list order.
    pub fn load(&self, plugins: &[String]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for plugin in plugins {
            match self
                .providers
                .iter()
                .find(|(name, _)| name == plugin)
            {
                Some((_, factory)) => {
                    registry.register(factory());
                    debug!(plugin = %plugin, "loaded handler");
                }
                None => {
                    error!(plugin = %plugin, "no linked capability provider, skipping");
                }
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Buffer, RoutineResult};

    struct NamedHandler(&'static str);

    impl Handler for NamedHandler {
        fn name(&self) -> &str {
            self.0
        }

        fn can_execute(&self, _routine: &str) -> bool {
            false
        }

        fn execute(&self, _routine: &str, _input: &mut Buffer) -> RoutineResult {
            RoutineResult::ok(Buffer::new())
        }
    }

    fn loader() -> PluginLoader {
        PluginLoader::new()
            .provide("cudart", || Box::new(NamedHandler("cudart")))
            .provide("cudadr", || Box::new(NamedHandler("cudadr")))
    }

    #[test]
    fn test_loads_in_config_order() {
        let plugins = vec!["cudadr".to_string(), "cudart".to_string()];
        let registry = loader().load(&plugins);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["cudadr", "cudart"]
        );
    }

    #[test]
    fn test_unknown_plugin_is_skipped_not_fatal() {
        let plugins = vec![
            "cudart".to_string(),
            "not-linked".to_string(),
            "cudadr".to_string(),
        ];
        let registry = loader().load(&plugins);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["cudart", "cudadr"]
        );
    }

    #[test]
    fn test_empty_config_is_empty_registry() {
        assert!(loader().load(&[]).is_empty());
    }
}

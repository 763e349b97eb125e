//! Handler registry - the loaded handler set.

use super::Handler;

/// The handlers a backend process serves, scanned in load order.
///
/// Read-only once the process starts serving; workers share it through an
/// `Arc` and need no further synchronization.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Load order is scan order.
    pub fn register(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// First handler whose membership test accepts `routine`.
    pub fn find(&self, routine: &str) -> Option<&dyn Handler> {
        self.handlers
            .iter()
            .map(Box::as_ref)
            .find(|handler| handler.can_execute(routine))
    }

    /// Number of loaded handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of the loaded handlers, in scan order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|handler| handler.name())
    }
}

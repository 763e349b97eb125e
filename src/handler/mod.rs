//! Handler module - the backend plugin contract.
//!
//! A [`Handler`] is a name-indexed table of executable routines: the
//! process consults [`Handler::can_execute`] first and only dispatches
//! names the test accepts. Provides:
//!
//! - [`HandlerRegistry`] - the loaded handler set, scanned in load order
//! - [`HandleTable`] - backend-side arena mapping opaque wire handles to
//!   real local resources
//! - [`PluginLoader`] - resolves configured plugin names against linked
//!   capability providers

mod handles;
mod loader;
mod registry;

pub use handles::HandleTable;
pub use loader::{HandlerFactory, PluginLoader};
pub use registry::HandlerRegistry;

use crate::protocol::{Buffer, RoutineResult};

/// One backend plugin: a membership test over routine names plus the
/// dispatch that executes them.
///
/// Handlers are stateless with respect to connections; whatever state a
/// plugin needs lives inside the native layer it wraps (typically behind a
/// [`HandleTable`]). The registry shares one instance across every
/// connection worker, hence `Send + Sync`.
///
/// `execute` must not let any failure escape: implementations catch every
/// internal error and encode it as a [`RoutineResult`] carrying a
/// library-specific status code and an empty output buffer. It is only
/// ever invoked for names `can_execute` accepts.
pub trait Handler: Send + Sync {
    /// The plugin's name, for load-time and diagnostic logging.
    fn name(&self) -> &str;

    /// Membership test: does this plugin implement `routine`?
    fn can_execute(&self, routine: &str) -> bool;

    /// Execute `routine` against the staged arguments. The elapsed time on
    /// the returned result is attached by the process, not here.
    fn execute(&self, routine: &str, input: &mut Buffer) -> RoutineResult;
}

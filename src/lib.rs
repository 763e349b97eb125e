//! # gpuwire
//!
//! Split-driver GPU-API remoting. A client process issues GPU-API calls
//! that are intercepted, staged into a length-framed [`Buffer`], shipped
//! over a pluggable transport to a backend holding the physical
//! accelerator, executed there by a plugin [`Handler`], and answered with
//! a framed [`RoutineResult`].
//!
//! ## Architecture
//!
//! - **Protocol**: scalar bytes plus a marshal table of opaque handles,
//!   framed by an 8-byte length header
//! - **Transports**: TCP, a legacy `udp://`-addressed stream variant,
//!   RDMA/RoCE (feature `rdma`), and Hybrid - a control channel and a
//!   bulk channel selected per call by routine name
//! - **Backend**: [`Process`] accepts connections and dispatches routines
//!   to the handlers a [`PluginLoader`] resolved at startup
//! - **Frontend**: [`Frontend`] stages arguments, executes, and reads
//!   outputs back in the backend's write order
//!
//! ## Example
//!
//! ```ignore
//! use gpuwire::{endpoint_from_file, Frontend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = endpoint_from_file("gpuwire.json")?;
//!     let mut frontend = Frontend::connect(&endpoint).await?;
//!
//!     frontend.prepare();
//!     frontend.add_variable(42i32);
//!     frontend.execute("ping").await?;
//!     assert!(frontend.success());
//!     println!("{}", frontend.get_output_variable::<i32>()?);
//!     Ok(())
//! }
//! ```

pub mod endpoint;
pub mod error;
pub mod frontend;
pub mod handler;
pub mod process;
pub mod protocol;
pub mod transport;

pub use endpoint::{endpoint_from_file, endpoint_from_json, plugins_from_json, Endpoint};
pub use error::{GpuWireError, Result};
pub use frontend::Frontend;
pub use handler::{HandleTable, Handler, HandlerRegistry, PluginLoader};
pub use process::{Process, ShutdownHandle};
pub use protocol::{
    Buffer, RemoteHandle, RoutineResult, Scalar, STATUS_OK, STATUS_UNKNOWN_ROUTINE,
};
pub use transport::{select_transport, Communicator, TransportKind};

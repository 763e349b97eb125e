//! Protocol module - the wire buffer format and the result envelope.
//!
//! This module implements the call payload format shared by every
//! transport:
//! - [`Buffer`] - length-framed byte container with a typed scalar table
//!   and a separate marshal table for cross-address-space identities
//! - [`RoutineResult`] - the response envelope {status, output, elapsed}
//! - [`RemoteHandle`] - the opaque identity that replaces raw pointers on
//!   the wire

mod buffer;
mod result;

pub use buffer::{Buffer, OutSlot, Scalar, FRAME_HEADER_LEN, MAX_BODY_LEN};
pub use result::{RoutineResult, STATUS_OK, STATUS_UNKNOWN_ROUTINE};

use std::fmt;

/// Opaque identity for a resource living in the backend's address space.
///
/// A raw pointer has no meaning on the other side of the wire, so
/// pointer-valued payloads travel as handles. The backend maps handles to
/// real local resources through a private [`HandleTable`]; addresses never
/// cross the trust boundary.
///
/// [`HandleTable`]: crate::handler::HandleTable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(u64);

impl RemoteHandle {
    /// The null handle. Tables never mint it, so it is safe as a
    /// "no resource" marker (mirroring a NULL stream or context).
    pub const NULL: RemoteHandle = RemoteHandle(0);

    /// Wrap a raw wire value.
    pub fn from_raw(raw: u64) -> Self {
        RemoteHandle(raw)
    }

    /// The raw wire value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Check whether this is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

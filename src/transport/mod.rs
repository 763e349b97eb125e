//! Transport module - the Communicator abstraction and its variants.
//!
//! A [`Communicator`] is one bidirectional transport handle:
//! serve/accept on the backend, connect on the frontend, blocking-style
//! read/write/sync/close on both. Variants:
//!
//! - [`TcpCommunicator`] - byte-stream sockets
//! - [`UdpCommunicator`] - legacy `udp://` address syntax, TCP semantics
//! - `RdmaCommunicator` - queue-pair bulk transport (cargo feature `rdma`)
//! - [`HybridCommunicator`] - composed control + bulk channel, selected
//!   per call

mod hybrid;
mod tcp;
mod udp;

#[cfg(feature = "rdma")]
mod rdma;

pub use hybrid::{select_transport, HybridCommunicator, BULK_ROUTINE_PREFIXES};
pub use tcp::TcpCommunicator;
pub use udp::UdpCommunicator;

#[cfg(feature = "rdma")]
pub use rdma::RdmaCommunicator;

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;

use crate::error::{GpuWireError, Result};

/// Closed set of transport kinds.
///
/// Dispatch on a communicator's flavor happens by matching on this enum,
/// obtained from [`Communicator::kind`] - never by comparing a display
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
    Rdma,
    Hybrid,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Rdma => "rdma",
            TransportKind::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Abstract bidirectional transport.
///
/// Lifecycle states are unbound -> listening (serve) or connected
/// (connect/accept) -> closed; I/O in the wrong state is a transport
/// error. Exactly one communicator instance serves one peer connection:
/// [`Communicator::accept`] yields a new peer-scoped instance and leaves
/// the listening instance untouched.
#[async_trait]
pub trait Communicator: Send {
    /// Bind and listen.
    async fn serve(&mut self) -> Result<()>;

    /// Block for the next peer. Returns a new peer-scoped instance, or
    /// `Ok(None)` on a transient failure or interrupting signal - callers
    /// re-poll, they never treat `None` as fatal.
    async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>>;

    /// Establish the outbound connection.
    async fn connect(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes. Returns the count transferred;
    /// 0 means the peer closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes. Returns the count transferred.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush anything buffered.
    async fn sync(&mut self) -> Result<()>;

    /// Release the underlying resources.
    async fn close(&mut self) -> Result<()>;

    /// This transport's kind, for pattern-matched dispatch.
    fn kind(&self) -> TransportKind;

    /// Local address observed after [`Communicator::serve`], where the
    /// variant has one. Lets callers bind port 0.
    fn bound_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Open the per-call channel bracket before a call's payload moves.
    /// Single-channel transports need nothing here; the hybrid variant
    /// selects and primes its active channel.
    async fn begin_call(&mut self, _routine: &str) -> Result<()> {
        Ok(())
    }

    /// Close the per-call bracket, returning the transport to its
    /// channel-agnostic idle state.
    fn end_call(&mut self) {}
}

/// Fill `buf` completely, failing with [`GpuWireError::ConnectionClosed`]
/// if the peer goes away first.
pub async fn read_exact_into(comm: &mut dyn Communicator, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = comm.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(GpuWireError::ConnectionClosed);
        }
        filled += n;
    }
    Ok(())
}

/// Write all of `buf`, failing with [`GpuWireError::ConnectionClosed`] if
/// the transport stops accepting bytes.
pub async fn write_all_into(comm: &mut dyn Communicator, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = comm.write(buf).await?;
        if n == 0 {
            return Err(GpuWireError::ConnectionClosed);
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Read a NUL-terminated routine name, one byte at a time.
///
/// Returns `Ok(None)` when the peer closed before sending any byte (the
/// clean end of a connection); a close in the middle of a name is a
/// protocol error.
pub async fn read_routine_name(comm: &mut dyn Communicator) -> Result<Option<String>> {
    let mut name = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = comm.read(&mut byte).await?;
        if n == 0 {
            if name.is_empty() {
                return Ok(None);
            }
            return Err(GpuWireError::Protocol(
                "connection closed in the middle of a routine name".to_string(),
            ));
        }
        if byte[0] == 0 {
            return String::from_utf8(name)
                .map(Some)
                .map_err(|_| GpuWireError::Protocol("routine name is not UTF-8".to_string()));
        }
        name.push(byte[0]);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory communicator for protocol-level tests.

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// One end of an in-memory duplex pipe, speaking the Communicator
    /// contract. Serve/accept/connect are not part of its job.
    pub(crate) struct DuplexCommunicator {
        stream: Option<DuplexStream>,
    }

    /// Build a connected pair with the given internal capacity.
    pub(crate) fn duplex_pair(capacity: usize) -> (DuplexCommunicator, DuplexCommunicator) {
        let (a, b) = tokio::io::duplex(capacity);
        (
            DuplexCommunicator { stream: Some(a) },
            DuplexCommunicator { stream: Some(b) },
        )
    }

    impl DuplexCommunicator {
        fn stream(&mut self) -> Result<&mut DuplexStream> {
            self.stream
                .as_mut()
                .ok_or_else(|| GpuWireError::Transport("duplex end is closed".to_string()))
        }
    }

    #[async_trait]
    impl Communicator for DuplexCommunicator {
        async fn serve(&mut self) -> Result<()> {
            Err(GpuWireError::Transport(
                "duplex test transport cannot serve".to_string(),
            ))
        }

        async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>> {
            Err(GpuWireError::Transport(
                "duplex test transport cannot accept".to_string(),
            ))
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(self.stream()?.read(buf).await?)
        }

        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(self.stream()?.write(buf).await?)
        }

        async fn sync(&mut self) -> Result<()> {
            Ok(self.stream()?.flush().await?)
        }

        async fn close(&mut self) -> Result<()> {
            self.stream = None;
            Ok(())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::duplex_pair;
    use super::*;

    #[tokio::test]
    async fn test_read_routine_name() {
        let (mut a, mut b) = duplex_pair(1024);
        write_all_into(&mut a, b"cudaMalloc\0").await.unwrap();

        let name = read_routine_name(&mut b).await.unwrap();
        assert_eq!(name.as_deref(), Some("cudaMalloc"));
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (mut a, mut b) = duplex_pair(1024);
        a.close().await.unwrap();

        assert!(read_routine_name(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_name_is_protocol_error() {
        let (mut a, mut b) = duplex_pair(1024);
        write_all_into(&mut a, b"cudaMal").await.unwrap();
        a.close().await.unwrap();

        assert!(matches!(
            read_routine_name(&mut b).await,
            Err(GpuWireError::Protocol(_))
        ));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::Tcp.to_string(), "tcp");
        assert_eq!(TransportKind::Hybrid.to_string(), "hybrid");
    }
}

//! RDMA transport - queue-pair bulk channel over `async-rdma`.
//!
//! Built only with the `rdma` cargo feature, which links rdma-core.
//! Queue pairs are message-oriented; this adapter re-exposes the
//! byte-stream Communicator contract by chunking writes into bounded
//! messages and draining received messages through an internal buffer, so
//! framing and routine-name reads work identically to every other
//! variant.

use async_rdma::{LocalMrReadAccess, LocalMrWriteAccess, Rdma, RdmaBuilder};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::alloc::Layout;
use std::sync::Arc;
use tracing::debug;

use super::{Communicator, TransportKind};
use crate::error::{GpuWireError, Result};

/// Upper bound for one queue-pair message.
const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Port number / gid index used for every queue pair.
const PORT_NUM: u8 = 1;
const GID_INDEX: usize = 1;

enum RdmaState {
    Unbound,
    /// The first accepted connection doubles as the listen handle for
    /// subsequent peers, so it is shared between the listening
    /// communicator and the first peer's instance.
    Listening { base: Option<Arc<Rdma>> },
    Connected(Arc<Rdma>),
    Closed,
}

/// Queue-pair communicator for bulk payloads. Higher setup cost than a
/// stream socket, near-memory-speed transfers once established.
pub struct RdmaCommunicator {
    address: String,
    port: u16,
    state: RdmaState,
    rx: BytesMut,
}

impl RdmaCommunicator {
    /// Create an unbound communicator for `address:port`.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            state: RdmaState::Unbound,
            rx: BytesMut::new(),
        }
    }

    fn from_connection(rdma: Arc<Rdma>) -> Self {
        Self {
            address: String::new(),
            port: 0,
            state: RdmaState::Connected(rdma),
            rx: BytesMut::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn builder() -> RdmaBuilder {
        RdmaBuilder::default()
            .set_port_num(PORT_NUM)
            .set_gid_index(GID_INDEX)
            .set_max_message_length(MAX_MESSAGE_LEN)
    }

    fn connection(&self) -> Result<&Rdma> {
        match &self.state {
            RdmaState::Connected(rdma) => Ok(rdma.as_ref()),
            _ => Err(GpuWireError::Transport(
                "rdma communicator is not connected".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Communicator for RdmaCommunicator {
    async fn serve(&mut self) -> Result<()> {
        if !matches!(self.state, RdmaState::Unbound) {
            return Err(GpuWireError::Transport(
                "serve called on a bound rdma communicator".to_string(),
            ));
        }
        // Queue-pair listeners materialize on the first accept; serve only
        // records the binding.
        self.state = RdmaState::Listening { base: None };
        Ok(())
    }

    async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>> {
        let endpoint = self.endpoint();
        match &mut self.state {
            RdmaState::Listening { base } => {
                let peer = match base {
                    None => {
                        // Blocks for the first peer; that connection is
                        // also the handle later accepts go through.
                        let first = Arc::new(Self::builder().listen(&endpoint).await?);
                        *base = Some(Arc::clone(&first));
                        first
                    }
                    Some(base) => Arc::new(base.listen().await?),
                };
                debug!(endpoint = %endpoint, "accepted rdma peer");
                Ok(Some(Box::new(Self::from_connection(peer))))
            }
            _ => Err(GpuWireError::Transport(
                "accept called before serve".to_string(),
            )),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if !matches!(self.state, RdmaState::Unbound) {
            return Err(GpuWireError::Transport(
                "connect called on a bound rdma communicator".to_string(),
            ));
        }
        let rdma = Self::builder().connect(&self.endpoint()).await?;
        self.state = RdmaState::Connected(Arc::new(rdma));
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.rx.is_empty() {
            let message = match self.connection()?.receive().await {
                Ok(message) => message,
                // A torn-down queue pair reads as end-of-stream.
                Err(_) => return Ok(0),
            };
            self.rx.extend_from_slice(&message.as_slice());
        }
        let n = buf.len().min(self.rx.len());
        self.rx.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = &buf[..buf.len().min(MAX_MESSAGE_LEN)];
        let rdma = self.connection()?;
        let layout = Layout::array::<u8>(chunk.len())
            .map_err(|e| GpuWireError::Transport(format!("mr layout: {e}")))?;
        let mut mr = rdma.alloc_local_mr(layout)?;
        mr.as_mut_slice().copy_from_slice(chunk);
        rdma.send(&mr).await?;
        Ok(chunk.len())
    }

    async fn sync(&mut self) -> Result<()> {
        // Sends complete when the work request does; nothing is buffered.
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = RdmaState::Closed;
        self.rx.clear();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Rdma
    }
}

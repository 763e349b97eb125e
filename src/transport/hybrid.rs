//! Hybrid transport - a control channel and a bulk channel under one
//! logical communicator, selected per call.
//!
//! Routine names that move device memory or compiled binary blobs go over
//! the bulk (RDMA-class) channel; everything else stays on the TCP control
//! channel. Selection is a static policy on the routine-name prefix,
//! applied independently for every call - never a function of call
//! history.
//!
//! Within a bulk-selected call, the 8-byte length header of each
//! direction's message still travels the control channel; only the body
//! bytes move over the bulk channel. The header is never split across
//! channels, and the two channels are never active concurrently for one
//! call.

use async_trait::async_trait;
use std::net::SocketAddr;
use tracing::debug;

use super::{read_exact_into, write_all_into, Communicator, TransportKind};
use crate::error::{GpuWireError, Result};
use crate::protocol::FRAME_HEADER_LEN;

/// Routine-name prefixes whose payloads ride the bulk channel: the
/// memory-copy family and fat-binary registration.
pub const BULK_ROUTINE_PREFIXES: &[&str] = &["cudaMemcpy", "cudaRegisterFatBinary"];

/// Static channel-selection policy. Pure in the routine name.
pub fn select_transport(routine: &str) -> TransportKind {
    if BULK_ROUTINE_PREFIXES
        .iter()
        .any(|prefix| routine.starts_with(prefix))
    {
        TransportKind::Rdma
    } else {
        TransportKind::Tcp
    }
}

/// Which side of the connection this instance is; decides who sends and
/// who receives the priming token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Listener,
    Accepted,
    Connected,
}

/// Per-call channel state. Idle means everything flows over control.
#[derive(Debug, Clone, Copy)]
struct CallState {
    bulk_selected: bool,
    /// Header bytes of the incoming message still owed to the control
    /// channel while bulk is selected.
    read_header_remaining: usize,
    /// Header bytes of the outgoing message still owed to the control
    /// channel while bulk is selected.
    write_header_remaining: usize,
}

impl CallState {
    const IDLE: CallState = CallState {
        bulk_selected: false,
        read_header_remaining: 0,
        write_header_remaining: 0,
    };

    fn bulk() -> CallState {
        CallState {
            bulk_selected: true,
            read_header_remaining: FRAME_HEADER_LEN,
            write_header_remaining: FRAME_HEADER_LEN,
        }
    }
}

/// Composite communicator: TCP-class control channel plus RDMA-class bulk
/// channel, one call bracket at a time.
pub struct HybridCommunicator {
    control: Box<dyn Communicator>,
    bulk: Box<dyn Communicator>,
    role: Role,
    state: CallState,
    priming_hint: u64,
}

impl HybridCommunicator {
    /// Compose a control and a bulk channel. `priming_hint` > 0 enables
    /// the warm-up exchange over the control channel before a
    /// bulk-selected call moves its first body byte; the value itself is
    /// advisory.
    pub fn new(
        control: Box<dyn Communicator>,
        bulk: Box<dyn Communicator>,
        priming_hint: u64,
    ) -> Self {
        Self {
            control,
            bulk,
            role: Role::Listener,
            state: CallState::IDLE,
            priming_hint,
        }
    }

    fn accepted(
        control: Box<dyn Communicator>,
        bulk: Box<dyn Communicator>,
        priming_hint: u64,
    ) -> Self {
        Self {
            control,
            bulk,
            role: Role::Accepted,
            state: CallState::IDLE,
            priming_hint,
        }
    }

    /// Local address of the control channel after `serve`.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.bound_addr()
    }

    /// Local address of the bulk channel after `serve`.
    pub fn bulk_addr(&self) -> Option<SocketAddr> {
        self.bulk.bound_addr()
    }

    async fn prime(&mut self) -> Result<()> {
        if self.priming_hint == 0 {
            return Ok(());
        }
        match self.role {
            Role::Connected => {
                let token = self.priming_hint.to_le_bytes();
                write_all_into(self.control.as_mut(), &token).await?;
                self.control.sync().await
            }
            Role::Accepted => {
                let mut token = [0u8; 8];
                read_exact_into(self.control.as_mut(), &mut token).await?;
                debug!(hint = u64::from_le_bytes(token), "bulk call primed");
                Ok(())
            }
            Role::Listener => Ok(()),
        }
    }
}

#[async_trait]
impl Communicator for HybridCommunicator {
    async fn serve(&mut self) -> Result<()> {
        self.control.serve().await?;
        self.bulk.serve().await
    }

    async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>> {
        // The control dial comes first; the same client then dials the
        // bulk channel.
        let control = match self.control.accept().await? {
            Some(peer) => peer,
            None => return Ok(None),
        };
        let bulk = loop {
            match self.bulk.accept().await? {
                Some(peer) => break peer,
                None => continue,
            }
        };
        Ok(Some(Box::new(Self::accepted(
            control,
            bulk,
            self.priming_hint,
        ))))
    }

    async fn connect(&mut self) -> Result<()> {
        self.control.connect().await?;
        self.bulk.connect().await?;
        self.role = Role::Connected;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.state.bulk_selected && self.state.read_header_remaining > 0 {
            let take = buf.len().min(self.state.read_header_remaining);
            let n = self.control.read(&mut buf[..take]).await?;
            self.state.read_header_remaining -= n;
            Ok(n)
        } else if self.state.bulk_selected {
            self.bulk.read(buf).await
        } else {
            self.control.read(buf).await
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.state.bulk_selected && self.state.write_header_remaining > 0 {
            let take = buf.len().min(self.state.write_header_remaining);
            let n = self.control.write(&buf[..take]).await?;
            self.state.write_header_remaining -= n;
            Ok(n)
        } else if self.state.bulk_selected {
            self.bulk.write(buf).await
        } else {
            self.control.write(buf).await
        }
    }

    async fn sync(&mut self) -> Result<()> {
        self.control.sync().await?;
        self.bulk.sync().await
    }

    async fn close(&mut self) -> Result<()> {
        let control = self.control.close().await;
        let bulk = self.bulk.close().await;
        control.and(bulk)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hybrid
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        self.control.bound_addr()
    }

    async fn begin_call(&mut self, routine: &str) -> Result<()> {
        match select_transport(routine) {
            TransportKind::Rdma => {
                debug!(%routine, "call selects the bulk channel");
                self.state = CallState::bulk();
                self.prime().await
            }
            _ => {
                self.state = CallState::IDLE;
                Ok(())
            }
        }
    }

    fn end_call(&mut self) {
        self.state = CallState::IDLE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{duplex_pair, DuplexCommunicator};
    use crate::Buffer;

    fn connected_hybrid(
        priming_hint: u64,
    ) -> (HybridCommunicator, DuplexCommunicator, DuplexCommunicator) {
        let (control_near, control_far) = duplex_pair(1 << 20);
        let (bulk_near, bulk_far) = duplex_pair(1 << 20);
        let mut hybrid = HybridCommunicator::new(
            Box::new(control_near),
            Box::new(bulk_near),
            priming_hint,
        );
        hybrid.role = Role::Connected;
        (hybrid, control_far, bulk_far)
    }

    #[test]
    fn test_policy_selects_bulk_for_memory_and_fatbin() {
        assert_eq!(select_transport("cudaMemcpy"), TransportKind::Rdma);
        assert_eq!(select_transport("cudaMemcpyAsync"), TransportKind::Rdma);
        assert_eq!(select_transport("cudaRegisterFatBinary"), TransportKind::Rdma);
        assert_eq!(
            select_transport("cudaRegisterFatBinaryEnd"),
            TransportKind::Rdma
        );
    }

    #[test]
    fn test_policy_keeps_everything_else_on_control() {
        assert_eq!(select_transport("cudaMalloc"), TransportKind::Tcp);
        assert_eq!(select_transport("cudaStreamCreate"), TransportKind::Tcp);
        assert_eq!(select_transport("ping"), TransportKind::Tcp);
        assert_eq!(select_transport(""), TransportKind::Tcp);
        // Prefix means prefix: a name merely containing the token stays
        // on control.
        assert_eq!(select_transport("fooCudaMemcpy"), TransportKind::Tcp);
    }

    #[test]
    fn test_policy_ignores_call_history() {
        let sequence = ["cudaMemcpy", "ping", "cudaMemcpy", "ping"];
        let kinds: Vec<_> = sequence.iter().map(|r| select_transport(r)).collect();
        assert_eq!(
            kinds,
            [
                TransportKind::Rdma,
                TransportKind::Tcp,
                TransportKind::Rdma,
                TransportKind::Tcp
            ]
        );
    }

    #[tokio::test]
    async fn test_idle_call_stays_entirely_on_control() {
        let (mut hybrid, mut control_far, mut bulk_far) = connected_hybrid(0);

        hybrid.begin_call("cudaMalloc").await.unwrap();
        let mut outgoing = Buffer::new();
        outgoing.add(7u32);
        outgoing.dump(&mut hybrid).await.unwrap();
        hybrid.end_call();

        // Everything - header and body - arrived on the control channel.
        let mut incoming = Buffer::new();
        incoming.reset(&mut control_far).await.unwrap();
        assert_eq!(incoming.get::<u32>().unwrap(), 7);

        // And nothing on bulk.
        bulk_far.close().await.unwrap();
        drop(hybrid);
    }

    #[tokio::test]
    async fn test_bulk_call_splits_header_from_body() {
        let (mut hybrid, mut control_far, mut bulk_far) = connected_hybrid(0);

        hybrid.begin_call("cudaMemcpy").await.unwrap();
        let mut outgoing = Buffer::new();
        outgoing.add_slice(&[1u8, 2, 3, 4]);
        let body = outgoing.to_body();
        outgoing.dump(&mut hybrid).await.unwrap();

        // Control carries exactly the 8-byte length header.
        let mut header = [0u8; FRAME_HEADER_LEN];
        read_exact_into(&mut control_far, &mut header).await.unwrap();
        assert_eq!(u64::from_le_bytes(header) as usize, body.len());

        // Bulk carries exactly the body.
        let mut got = vec![0u8; body.len()];
        read_exact_into(&mut bulk_far, &mut got).await.unwrap();
        assert_eq!(got, body.to_vec());
    }

    #[tokio::test]
    async fn test_bulk_call_reads_header_from_control() {
        let (mut hybrid, mut control_far, mut bulk_far) = connected_hybrid(0);

        // The far side frames a reply: header on control, body on bulk.
        let mut reply = Buffer::new();
        reply.add(99i64);
        let body = reply.to_body();
        write_all_into(&mut control_far, &(body.len() as u64).to_le_bytes())
            .await
            .unwrap();
        write_all_into(&mut bulk_far, &body).await.unwrap();

        hybrid.begin_call("cudaMemcpyAsync").await.unwrap();
        let mut incoming = Buffer::new();
        incoming.reset(&mut hybrid).await.unwrap();
        hybrid.end_call();
        assert_eq!(incoming.get::<i64>().unwrap(), 99);
    }

    #[tokio::test]
    async fn test_priming_token_precedes_bulk_traffic() {
        let (mut hybrid, mut control_far, _bulk_far) = connected_hybrid(5);

        hybrid.begin_call("cudaMemcpy").await.unwrap();

        let mut token = [0u8; 8];
        read_exact_into(&mut control_far, &mut token).await.unwrap();
        assert_eq!(u64::from_le_bytes(token), 5);
    }

    #[tokio::test]
    async fn test_accepted_side_consumes_priming_token() {
        let (control_near, mut control_far) = duplex_pair(1 << 20);
        let (bulk_near, _bulk_far) = duplex_pair(1 << 20);
        let mut hybrid =
            HybridCommunicator::accepted(Box::new(control_near), Box::new(bulk_near), 1);

        write_all_into(&mut control_far, &1u64.to_le_bytes())
            .await
            .unwrap();
        hybrid.begin_call("cudaRegisterFatBinary").await.unwrap();

        // The token was consumed; the next control byte is payload.
        write_all_into(&mut control_far, &[0xab]).await.unwrap();
        let mut next = [0u8; 1];
        read_exact_into(&mut hybrid, &mut next).await.unwrap();
        assert_eq!(next[0], 0xab);
    }

    #[tokio::test]
    async fn test_end_call_returns_to_control() {
        let (mut hybrid, mut control_far, mut bulk_far) = connected_hybrid(0);

        hybrid.begin_call("cudaMemcpy").await.unwrap();
        let mut bulk_msg = Buffer::new();
        bulk_msg.add(1u8);
        bulk_msg.dump(&mut hybrid).await.unwrap();
        hybrid.end_call();

        // Drain the bulk-selected call on the far side.
        let mut header = [0u8; FRAME_HEADER_LEN];
        read_exact_into(&mut control_far, &mut header).await.unwrap();
        let mut body = vec![0u8; u64::from_le_bytes(header) as usize];
        read_exact_into(&mut bulk_far, &mut body).await.unwrap();

        // The next, control-selected call goes entirely over control.
        hybrid.begin_call("ping").await.unwrap();
        let mut control_msg = Buffer::new();
        control_msg.add(2u8);
        control_msg.dump(&mut hybrid).await.unwrap();
        hybrid.end_call();

        let mut incoming = Buffer::new();
        incoming.reset(&mut control_far).await.unwrap();
        assert_eq!(incoming.get::<u8>().unwrap(), 2);
    }
}

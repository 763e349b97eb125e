//! TCP transport - byte-stream sockets.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::{Communicator, TransportKind};
use crate::error::{GpuWireError, Result};

enum TcpState {
    Unbound,
    Listening(TcpListener),
    Connected(TcpStream),
    Closed,
}

/// Stream-socket communicator.
///
/// One instance is either the listening side (after [`serve`]) or one peer
/// connection (after [`connect`], or returned by [`accept`]).
///
/// [`serve`]: Communicator::serve
/// [`connect`]: Communicator::connect
/// [`accept`]: Communicator::accept
pub struct TcpCommunicator {
    address: String,
    port: u16,
    state: TcpState,
    bound: Option<SocketAddr>,
}

impl TcpCommunicator {
    /// Create an unbound communicator for `address:port`.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            state: TcpState::Unbound,
            bound: None,
        }
    }

    fn from_stream(stream: TcpStream) -> Self {
        Self {
            address: String::new(),
            port: 0,
            state: TcpState::Connected(stream),
            bound: None,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        match &mut self.state {
            TcpState::Connected(stream) => Ok(stream),
            _ => Err(GpuWireError::Transport(
                "tcp communicator is not connected".to_string(),
            )),
        }
    }

    /// Accept the next peer as a concrete instance. Shared by the TCP and
    /// legacy-UDP trait impls, which differ only in how they wrap it.
    pub(crate) async fn accept_peer(&mut self) -> Result<Option<TcpCommunicator>> {
        let listener = match &self.state {
            TcpState::Listening(listener) => listener,
            _ => {
                return Err(GpuWireError::Transport(
                    "accept called before serve".to_string(),
                ))
            }
        };
        match listener.accept().await {
            Ok((stream, peer)) => {
                // Latency over throughput: every call blocks on its reply.
                stream.set_nodelay(true).ok();
                debug!(%peer, "accepted connection");
                Ok(Some(Self::from_stream(stream)))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted
                        | ErrorKind::WouldBlock
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionReset
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Communicator for TcpCommunicator {
    async fn serve(&mut self) -> Result<()> {
        if !matches!(self.state, TcpState::Unbound) {
            return Err(GpuWireError::Transport(
                "serve called on a bound tcp communicator".to_string(),
            ));
        }
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        self.bound = listener.local_addr().ok();
        debug!(addr = ?self.bound, "tcp communicator listening");
        self.state = TcpState::Listening(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>> {
        Ok(self
            .accept_peer()
            .await?
            .map(|peer| Box::new(peer) as Box<dyn Communicator>))
    }

    async fn connect(&mut self) -> Result<()> {
        if !matches!(self.state, TcpState::Unbound) {
            return Err(GpuWireError::Transport(
                "connect called on a bound tcp communicator".to_string(),
            ));
        }
        let stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
        stream.set_nodelay(true).ok();
        self.state = TcpState::Connected(stream);
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
        if let TcpState::Connected(stream) = &mut self.state {
            stream.shutdown().await.ok();
        }
        self.state = TcpState::Closed;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound
    }
}

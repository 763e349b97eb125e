//! Legacy UDP-syntax transport.
//!
//! Historical clients configure this variant with a `udp://host:port`
//! address string, but it has always spoken plain TCP underneath - stream
//! semantics, not datagrams. The address syntax is the only thing
//! UDP-shaped about it.

use async_trait::async_trait;
use std::net::SocketAddr;

use super::{Communicator, TcpCommunicator, TransportKind};
use crate::error::{GpuWireError, Result};

/// Stream communicator addressed with the legacy `udp://` syntax.
pub struct UdpCommunicator {
    inner: TcpCommunicator,
}

impl UdpCommunicator {
    /// Create from host and port.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            inner: TcpCommunicator::new(address, port),
        }
    }

    /// Parse a `udp://host:port` address string.
    pub fn from_address_string(address: &str) -> Result<Self> {
        let rest = address.strip_prefix("udp://").ok_or_else(|| {
            GpuWireError::Config(format!("'{address}' is not a udp:// address"))
        })?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            GpuWireError::Config(format!("port not specified in '{address}'"))
        })?;
        if host.is_empty() {
            return Err(GpuWireError::Config(format!(
                "host not specified in '{address}'"
            )));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| GpuWireError::Config(format!("invalid port in '{address}'")))?;
        Ok(Self::new(host, port))
    }
}

#[async_trait]
impl Communicator for UdpCommunicator {
    async fn serve(&mut self) -> Result<()> {
        self.inner.serve().await
    }

    async fn accept(&mut self) -> Result<Option<Box<dyn Communicator>>> {
        Ok(self
            .inner
            .accept_peer()
            .await?
            .map(|peer| Box::new(UdpCommunicator { inner: peer }) as Box<dyn Communicator>))
    }

    async fn connect(&mut self) -> Result<()> {
        self.inner.connect().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf).await
    }

    async fn sync(&mut self) -> Result<()> {
        self.inner.sync().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        self.inner.bound_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{read_exact_into, write_all_into};

    #[test]
    fn test_address_string_parsing() {
        let comm = UdpCommunicator::from_address_string("udp://localhost:7777");
        assert!(comm.is_ok());
        assert_eq!(comm.unwrap().kind(), TransportKind::Udp);
    }

    #[test]
    fn test_rejects_missing_scheme() {
        assert!(matches!(
            UdpCommunicator::from_address_string("localhost:7777"),
            Err(GpuWireError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_missing_or_bad_port() {
        assert!(UdpCommunicator::from_address_string("udp://localhost").is_err());
        assert!(UdpCommunicator::from_address_string("udp://localhost:kaboom").is_err());
        assert!(UdpCommunicator::from_address_string("udp://:7777").is_err());
    }

    #[tokio::test]
    async fn test_speaks_stream_semantics_underneath() {
        // A legacy-addressed client talks to a plain TCP server: nothing
        // datagram-shaped on the wire.
        let mut server = UdpCommunicator::new("127.0.0.1", 0);
        server.serve().await.unwrap();
        let addr = server.bound_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut client =
                UdpCommunicator::from_address_string(&format!("udp://127.0.0.1:{}", addr.port()))
                    .unwrap();
            client.connect().await.unwrap();
            write_all_into(&mut client, b"legacy").await.unwrap();
            client.sync().await.unwrap();
            client.close().await.unwrap();
        });

        let mut peer = server.accept().await.unwrap().expect("peer");
        assert_eq!(peer.kind(), TransportKind::Udp);
        let mut got = [0u8; 6];
        read_exact_into(peer.as_mut(), &mut got).await.unwrap();
        assert_eq!(&got, b"legacy");
        client_task.await.unwrap();
    }
}

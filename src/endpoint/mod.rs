//! Endpoint module - declarative transport configuration.
//!
//! An [`Endpoint`] is an immutable configuration value parsed once from
//! the JSON config and used to construct exactly one communicator. The
//! factory functions live in [`factory`] and are re-exported here.

mod factory;

pub use factory::{endpoint_from_file, endpoint_from_json, plugins_from_json};

use serde::{Deserialize, Deserializer};

use crate::error::{GpuWireError, Result};
use crate::transport::{Communicator, HybridCommunicator, TcpCommunicator};

/// Default priming hint for hybrid bulk calls (see
/// [`HybridCommunicator::new`]).
pub const DEFAULT_PRIMING_HINT: u64 = 1;

fn default_priming_hint() -> u64 {
    DEFAULT_PRIMING_HINT
}

fn default_bulk_suite() -> String {
    "roce-rdma".to_string()
}

/// Historical configs write the port as a JSON string; newer ones as a
/// number. Accept both.
fn de_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Configuration for the `tcp/ip` suite.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TcpEndpoint {
    #[serde(rename = "server_address")]
    pub address: String,
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
}

/// Configuration for the `infiniband-rdma` and `roce-rdma` suites. The two
/// share one endpoint shape; the fabric difference lives below the queue
/// pair.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RdmaEndpoint {
    #[serde(rename = "server_address")]
    pub address: String,
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
}

/// Configuration for the `hybrid` suite: a TCP control channel plus a bulk
/// channel.
///
/// `bulk_suite` names the bulk channel's flavor; `roce-rdma` in
/// production, `tcp/ip` permitted so the channel-split path can run
/// without RDMA hardware. `priming_hint` configures the warm-up token of
/// bulk-selected calls; zero disables priming.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HybridEndpoint {
    #[serde(rename = "server_address")]
    pub address: String,
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
    #[serde(default = "default_bulk_suite")]
    pub bulk_suite: String,
    pub bulk_address: String,
    #[serde(deserialize_with = "de_port")]
    pub bulk_port: u16,
    #[serde(default = "default_priming_hint")]
    pub priming_hint: u64,
}

/// Parsed endpoint configuration, one variant per suite family.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Tcp(TcpEndpoint),
    Rdma(RdmaEndpoint),
    Hybrid(HybridEndpoint),
}

impl Endpoint {
    /// Construct the communicator this endpoint describes. Construction
    /// never touches the network; serve/connect do.
    pub fn build(&self) -> Result<Box<dyn Communicator>> {
        match self {
            Endpoint::Tcp(tcp) => Ok(Box::new(TcpCommunicator::new(&*tcp.address, tcp.port))),
            Endpoint::Rdma(rdma) => build_rdma(&rdma.address, rdma.port),
            Endpoint::Hybrid(hybrid) => {
                let control: Box<dyn Communicator> =
                    Box::new(TcpCommunicator::new(&*hybrid.address, hybrid.port));
                let bulk: Box<dyn Communicator> = match hybrid.bulk_suite.as_str() {
                    "tcp/ip" => Box::new(TcpCommunicator::new(
                        &*hybrid.bulk_address,
                        hybrid.bulk_port,
                    )),
                    "infiniband-rdma" | "roce-rdma" => {
                        build_rdma(&hybrid.bulk_address, hybrid.bulk_port)?
                    }
                    other => {
                        return Err(GpuWireError::Config(format!(
                            "unrecognized bulk suite '{other}'"
                        )))
                    }
                };
                Ok(Box::new(HybridCommunicator::new(
                    control,
                    bulk,
                    hybrid.priming_hint,
                )))
            }
        }
    }
}

#[cfg(feature = "rdma")]
fn build_rdma(address: &str, port: u16) -> Result<Box<dyn Communicator>> {
    Ok(Box::new(crate::transport::RdmaCommunicator::new(
        address, port,
    )))
}

#[cfg(not(feature = "rdma"))]
fn build_rdma(_address: &str, _port: u16) -> Result<Box<dyn Communicator>> {
    Err(GpuWireError::Config(
        "rdma suites require building with the `rdma` feature".to_string(),
    ))
}

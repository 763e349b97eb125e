//! Endpoint factory - JSON document to [`Endpoint`] value.
//!
//! The configuration is one JSON document with a `communicator` array;
//! each entry carries an `endpoint` object whose `suite` field selects the
//! transport family:
//!
//! ```json
//! {
//!   "communicator": [
//!     {
//!       "endpoint": {
//!         "suite": "tcp/ip",
//!         "protocol": "tcp",
//!         "server_address": "127.0.0.1",
//!         "port": "9999"
//!       }
//!     }
//!   ],
//!   "plugins": ["cudart"]
//! }
//! ```
//!
//! The entry to parse is an explicit `index` parameter; deployments use
//! entry 0 and [`endpoint_from_file`] passes exactly that.

use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use super::Endpoint;
use crate::error::{GpuWireError, Result};

/// Parse entry 0 of the `communicator` array in the given file.
pub fn endpoint_from_file(path: impl AsRef<Path>) -> Result<Endpoint> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        GpuWireError::Config(format!(
            "cannot open configuration file {}: {e}",
            path.display()
        ))
    })?;
    let config: Value = serde_json::from_reader(BufReader::new(file))?;
    endpoint_from_json(&config, 0)
}

/// Parse the `communicator` entry at `index` into an [`Endpoint`].
pub fn endpoint_from_json(config: &Value, index: usize) -> Result<Endpoint> {
    let entries = config
        .get("communicator")
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| {
            GpuWireError::Config("invalid or missing 'communicator' array".to_string())
        })?;
    let entry = entries.get(index).ok_or_else(|| {
        GpuWireError::Config(format!(
            "no communicator entry at index {index} ({} configured)",
            entries.len()
        ))
    })?;
    let endpoint = entry.get("endpoint").ok_or_else(|| {
        GpuWireError::Config("communicator entry has no 'endpoint' object".to_string())
    })?;
    let suite = match endpoint.get("suite") {
        Some(Value::String(suite)) => suite.as_str(),
        Some(Value::Null) | None => {
            return Err(GpuWireError::Config(
                "missing or null 'suite' in endpoint configuration".to_string(),
            ))
        }
        Some(_) => {
            return Err(GpuWireError::Config(
                "'suite' must be a string".to_string(),
            ))
        }
    };
    info!(%suite, "parsed endpoint suite");

    match suite {
        "tcp/ip" => Ok(Endpoint::Tcp(serde_json::from_value(endpoint.clone())?)),
        "infiniband-rdma" | "roce-rdma" => {
            Ok(Endpoint::Rdma(serde_json::from_value(endpoint.clone())?))
        }
        "hybrid" => Ok(Endpoint::Hybrid(serde_json::from_value(endpoint.clone())?)),
        other => Err(GpuWireError::Config(format!(
            "unrecognized endpoint suite '{other}'"
        ))),
    }
}

/// The backend's configured plugin names. A missing key is an empty list.
pub fn plugins_from_json(config: &Value) -> Vec<String> {
    config
        .get("plugins")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

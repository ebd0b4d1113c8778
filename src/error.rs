// error.rs
use std::net::SocketAddr;
use thiserror::Error;

/// Failures at the wireless transport boundary. All of these are recovered
/// locally by the supervisor (rescan); none terminate the process.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),
    #[error("peripheral {0} exposes no subscribable button characteristic")]
    NoCharacteristic(String),
    #[error("bluetooth backend error: {0}")]
    Backend(#[from] btleplug::Error),
}

/// Failures at the lamp protocol boundary. A `Connection` error fails the
/// whole batch; command rejections are tracked per command and never
/// surface as an `Err` from the client.
#[derive(Error, Debug)]
pub enum LampError {
    #[error("failed to connect to lamp {endpoint}: {source}")]
    Connection {
        endpoint: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode command {method}: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

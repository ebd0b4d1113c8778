// transport/mod.rs
pub mod ble;

use crate::error::TransportError;

/// Advertisement record seen while scanning.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub id: String,
    pub name: String,
    pub address: String,
    pub connectable: bool,
}

/// Everything the supervisor reacts to, delivered over one mpsc channel so
/// the supervisor stays a single event-consuming loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    AdapterUp,
    AdapterDown,
    Discovered(Advertisement),
    Notification { peripheral: String, payload: Vec<u8> },
}

/// The wireless transport boundary. Peripherals are addressed by the
/// opaque id carried in their `Advertisement`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn start_scan(&self) -> Result<(), TransportError>;
    async fn stop_scan(&self) -> Result<(), TransportError>;
    async fn connect(&self, id: &str) -> Result<(), TransportError>;
    /// Discovers the button service and subscribes to its notify
    /// characteristic; notifications arrive as `TransportEvent`s.
    async fn subscribe(&self, id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self, id: &str) -> Result<(), TransportError>;
    async fn is_connected(&self, id: &str) -> Result<bool, TransportError>;
}

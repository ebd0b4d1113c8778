// transport/ble.rs
use std::sync::Arc;

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{Advertisement, Transport, TransportEvent};
use crate::error::TransportError;

const BUTTON_SERVICE: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
const BUTTON_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// btleplug-backed transport. A pump task translates adapter events into
/// `TransportEvent`s; handles of filter-matching peripherals are cached by
/// id so the supervisor can address them through the trait.
pub struct BleTransport {
    adapter: Adapter,
    name_filters: Vec<String>,
    peripherals: DashMap<String, Peripheral>,
    events: mpsc::Sender<TransportEvent>,
}

impl BleTransport {
    /// Grabs the first available adapter and starts pumping its events
    /// into the returned channel.
    pub async fn new(
        name_filters: Vec<String>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterUnavailable)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(Self {
            adapter,
            name_filters,
            peripherals: DashMap::new(),
            events: tx,
        });
        transport.spawn_pump().await?;
        Ok((transport, rx))
    }

    async fn spawn_pump(self: &Arc<Self>) -> Result<(), TransportError> {
        let mut events = self.adapter.events().await?;
        // report the real initial state, like noble's first stateChange
        let state = self.adapter.adapter_state().await?;
        let _ = self.events.send(state_event(state)).await;

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                transport.pump(event).await;
            }
        });
        Ok(())
    }

    async fn pump(&self, event: CentralEvent) {
        match event {
            CentralEvent::StateUpdate(state) => {
                debug!(?state, "adapter state update");
                let _ = self.events.send(state_event(state)).await;
            }
            // a name carried in the scan response only shows up on a later
            // DeviceUpdated, so both events get the same treatment
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                    return;
                };
                let properties = peripheral.properties().await.ok().flatten();
                let Some(advertisement) =
                    matching_advertisement(&self.name_filters, id.to_string(), properties)
                else {
                    return;
                };
                self.peripherals
                    .insert(advertisement.id.clone(), peripheral);
                let _ = self
                    .events
                    .send(TransportEvent::Discovered(advertisement))
                    .await;
            }
            _ => {}
        }
    }

    fn peripheral(&self, id: &str) -> Result<Peripheral, TransportError> {
        self.peripherals
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownPeripheral(id.to_string()))
    }
}

fn state_event(state: CentralState) -> TransportEvent {
    if matches!(state, CentralState::PoweredOn) {
        TransportEvent::AdapterUp
    } else {
        TransportEvent::AdapterDown
    }
}

/// An advertisement is surfaced only once its properties carry a name that
/// matches the configured filters; everything else stays uncached so the
/// handle map does not grow with the neighborhood.
fn matching_advertisement(
    name_filters: &[String],
    id: String,
    properties: Option<PeripheralProperties>,
) -> Option<Advertisement> {
    let properties = properties?;
    let name = properties.local_name?;
    if !name_filters.iter().any(|filter| filter == name.trim()) {
        return None;
    }
    Some(Advertisement {
        id,
        name,
        address: properties.address.to_string(),
        connectable: true,
    })
}

#[async_trait::async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self) -> Result<(), TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<(), TransportError> {
        self.peripheral(id)?.connect().await?;
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<(), TransportError> {
        let peripheral = self.peripheral(id)?;
        peripheral.discover_services().await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.service_uuid == BUTTON_SERVICE
                    && c.uuid == BUTTON_CHARACTERISTIC
                    && c.properties.contains(CharPropFlags::NOTIFY)
            })
            .ok_or_else(|| TransportError::NoCharacteristic(id.to_string()))?;
        peripheral.subscribe(&characteristic).await?;

        let mut notifications = peripheral.notifications().await?;
        let events = self.events.clone();
        let peripheral_id = id.to_string();
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != BUTTON_CHARACTERISTIC {
                    continue;
                }
                let event = TransportEvent::Notification {
                    peripheral: peripheral_id.clone(),
                    payload: notification.value,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<(), TransportError> {
        let peripheral = self.peripheral(id)?;
        let result = peripheral.disconnect().await;
        // evict the handle even when the disconnect itself fails
        self.peripherals.remove(id);
        result.map_err(TransportError::from)
    }

    async fn is_connected(&self, id: &str) -> Result<bool, TransportError> {
        Ok(self.peripheral(id)?.is_connected().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> Vec<String> {
        vec!["TrackerPA".to_string()]
    }

    fn named(name: &str) -> Option<PeripheralProperties> {
        Some(PeripheralProperties {
            local_name: Some(name.to_string()),
            ..PeripheralProperties::default()
        })
    }

    #[test]
    fn advertisement_waits_for_a_name() {
        // the first advertising packet may carry no name yet; the device
        // must still be surfaced once later properties fill it in
        assert!(matching_advertisement(&filters(), "p1".into(), None).is_none());
        assert!(
            matching_advertisement(
                &filters(),
                "p1".into(),
                Some(PeripheralProperties::default())
            )
            .is_none()
        );

        let advertisement =
            matching_advertisement(&filters(), "p1".into(), named(" TrackerPA ")).unwrap();
        assert_eq!(advertisement.id, "p1");
        assert_eq!(advertisement.name, " TrackerPA ");
        assert!(advertisement.connectable);
    }

    #[test]
    fn only_filter_matches_are_surfaced() {
        assert!(matching_advertisement(&filters(), "p1".into(), named("SomethingElse")).is_none());
    }

    #[test]
    fn adapter_state_maps_to_power_events() {
        assert!(matches!(
            state_event(CentralState::PoweredOn),
            TransportEvent::AdapterUp
        ));
        assert!(matches!(
            state_event(CentralState::PoweredOff),
            TransportEvent::AdapterDown
        ));
        assert!(matches!(
            state_event(CentralState::Unknown),
            TransportEvent::AdapterDown
        ));
    }
}

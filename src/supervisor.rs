// supervisor.rs
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};

use crate::buttons::{ButtonEvent, Debouncer};
use crate::error::TransportError;
use crate::transport::{Advertisement, Transport, TransportEvent};

/// Owns the wireless lifecycle: scan, connect, subscribe, detect silent
/// disconnects and rescan. A single loop consumes transport events and a
/// periodic health tick; button notifications are handed to the debouncer.
pub struct Supervisor<T: Transport> {
    transport: Arc<T>,
    events: mpsc::Receiver<TransportEvent>,
    debouncer: Debouncer,
    name_filters: Vec<String>,
    health_interval: Duration,
    // peripheral id -> address, for every peripheral believed connected
    tracked: DashMap<String, String>,
    powered: bool,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        transport: Arc<T>,
        events: mpsc::Receiver<TransportEvent>,
        debouncer: Debouncer,
        name_filters: Vec<String>,
        health_interval: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            debouncer,
            name_filters,
            health_interval,
            tracked: DashMap::new(),
            powered: false,
        }
    }

    /// Runs until the transport event channel closes.
    pub async fn run(mut self) {
        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = health.tick() => self.health_check().await,
            }
        }
        info!("transport event stream closed, supervisor stopping");
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterUp => {
                self.powered = true;
                info!("adapter powered on, starting scan");
                if let Err(error) = self.transport.start_scan().await {
                    warn!(%error, "failed to start scan");
                }
            }
            TransportEvent::AdapterDown => {
                self.powered = false;
                info!("adapter unavailable, going idle");
                self.teardown().await;
            }
            TransportEvent::Discovered(advertisement) => self.handle_discovery(advertisement).await,
            TransportEvent::Notification { peripheral, payload } => {
                self.handle_notification(&peripheral, &payload);
            }
        }
    }

    async fn handle_discovery(&self, advertisement: Advertisement) {
        let name = advertisement.name.trim();
        if !self.name_filters.iter().any(|filter| filter == name) {
            return;
        }
        info!(
            id = %advertisement.id,
            name,
            address = %advertisement.address,
            connectable = advertisement.connectable,
            "peripheral discovered"
        );
        if !advertisement.connectable || self.tracked.contains_key(&advertisement.id) {
            return;
        }
        if let Err(error) = self.attach(&advertisement).await {
            warn!(id = %advertisement.id, %error, "failed to attach peripheral");
            // leave the peripheral untracked; scanning continues unharmed
            self.tracked.remove(&advertisement.id);
            let _ = self.transport.disconnect(&advertisement.id).await;
        }
    }

    async fn attach(&self, advertisement: &Advertisement) -> Result<(), TransportError> {
        self.transport.connect(&advertisement.id).await?;
        info!(id = %advertisement.id, "connected to peripheral");
        self.tracked
            .insert(advertisement.id.clone(), advertisement.address.clone());
        self.transport.subscribe(&advertisement.id).await?;
        info!(id = %advertisement.id, "subscribed to button notifications");
        Ok(())
    }

    fn handle_notification(&self, peripheral: &str, payload: &[u8]) {
        trace!(peripheral, ?payload, "notification");
        match ButtonEvent::from_payload(payload) {
            Some(event) => self.debouncer.handle(event),
            None => trace!(peripheral, "unrecognized event payload dropped"),
        }
    }

    /// Sweeps the tracked set; if any peripheral silently dropped its
    /// connection, restarts scanning from scratch. Rescan is the sole
    /// disconnect-recovery path, and only runs while the adapter is up.
    async fn health_check(&self) {
        let peripherals: Vec<(String, String)> = self
            .tracked
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut restart_scan = false;
        for (id, address) in peripherals {
            let connected = self.transport.is_connected(&id).await.unwrap_or(false);
            if !connected {
                warn!(%address, "peripheral no longer connected");
                restart_scan = true;
            }
        }
        if restart_scan && self.powered {
            info!("restarting scan");
            self.teardown().await;
            if let Err(error) = self.transport.start_scan().await {
                warn!(%error, "failed to restart scan");
            }
        }
    }

    /// Stops scanning and explicitly disconnects every tracked peripheral,
    /// emptying the tracked set.
    async fn teardown(&self) {
        if let Err(error) = self.transport.stop_scan().await {
            warn!(%error, "failed to stop scan");
        }
        let ids: Vec<String> = self.tracked.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            match self.transport.disconnect(&id).await {
                Ok(()) => info!(peripheral = %id, "disconnected from peripheral"),
                Err(error) => warn!(peripheral = %id, %error, "disconnect failed"),
            }
            self.tracked.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::error::LampError;
    use crate::lamp::{BatchReport, LampClient};
    use crate::scene::{Batch, SceneEngine};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(String),
        Subscribe(String),
        Disconnect(String),
    }

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<Call>>,
        connected: Mutex<HashMap<String, bool>>,
        fail_subscribe: bool,
    }

    impl MockTransport {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn drop_connection(&self, id: &str) {
            self.connected.lock().unwrap().insert(id.to_string(), false);
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn start_scan(&self) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::StartScan);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::StopScan);
            Ok(())
        }

        async fn connect(&self, id: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::Connect(id.to_string()));
            self.connected.lock().unwrap().insert(id.to_string(), true);
            Ok(())
        }

        async fn subscribe(&self, id: &str) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Subscribe(id.to_string()));
            if self.fail_subscribe {
                return Err(TransportError::NoCharacteristic(id.to_string()));
            }
            Ok(())
        }

        async fn disconnect(&self, id: &str) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Disconnect(id.to_string()));
            self.connected.lock().unwrap().insert(id.to_string(), false);
            Ok(())
        }

        async fn is_connected(&self, id: &str) -> Result<bool, TransportError> {
            Ok(self
                .connected
                .lock()
                .unwrap()
                .get(id)
                .copied()
                .unwrap_or(false))
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        batches: Mutex<Vec<Batch>>,
    }

    #[async_trait::async_trait]
    impl LampClient for RecordingClient {
        async fn apply_batch(&self, batch: &Batch) -> Result<BatchReport, LampError> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(BatchReport::default())
        }
    }

    struct Fixture {
        transport: Arc<MockTransport>,
        engine: Arc<SceneEngine>,
        client: Arc<RecordingClient>,
        supervisor: Supervisor<MockTransport>,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let transport = Arc::new(transport);
        let engine = Arc::new(SceneEngine::new([
            "127.0.0.1:55443".parse().unwrap(),
            "127.0.0.2:55443".parse().unwrap(),
        ]));
        let client = Arc::new(RecordingClient::default());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&engine), client.clone()));
        let debouncer = Debouncer::new(Arc::clone(&engine), dispatcher, Duration::from_millis(1));
        let (_tx, rx) = mpsc::channel(8);
        let supervisor = Supervisor::new(
            Arc::clone(&transport),
            rx,
            debouncer,
            vec!["TrackerPA".to_string()],
            Duration::from_secs(5),
        );
        Fixture {
            transport,
            engine,
            client,
            supervisor,
        }
    }

    fn advertisement(id: &str) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: " TrackerPA ".to_string(),
            address: "aa:bb:cc:dd:ee:ff".to_string(),
            connectable: true,
        }
    }

    #[tokio::test]
    async fn matching_discovery_connects_and_subscribes() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        assert_eq!(
            f.transport.calls(),
            [
                Call::Connect("p1".to_string()),
                Call::Subscribe("p1".to_string())
            ]
        );
        assert_eq!(f.supervisor.tracked.len(), 1);
    }

    #[tokio::test]
    async fn non_matching_or_unconnectable_discoveries_are_ignored() {
        let mut f = fixture(MockTransport::default());
        let mut other = advertisement("p1");
        other.name = "SomethingElse".to_string();
        f.supervisor
            .handle_event(TransportEvent::Discovered(other))
            .await;

        let mut unconnectable = advertisement("p2");
        unconnectable.connectable = false;
        f.supervisor
            .handle_event(TransportEvent::Discovered(unconnectable))
            .await;

        assert!(f.transport.calls().is_empty());
        assert!(f.supervisor.tracked.is_empty());
    }

    #[tokio::test]
    async fn duplicate_discovery_is_not_double_connected() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        let connects = f
            .transport
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        assert_eq!(f.supervisor.tracked.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_failure_leaves_peripheral_untracked() {
        let mut f = fixture(MockTransport {
            fail_subscribe: true,
            ..MockTransport::default()
        });
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        assert!(f.supervisor.tracked.is_empty());
        // the half-attached peripheral was explicitly disconnected
        assert!(
            f.transport
                .calls()
                .contains(&Call::Disconnect("p1".to_string()))
        );
    }

    #[tokio::test]
    async fn health_check_rescans_after_silent_disconnect() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::AdapterUp)
            .await;
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;

        // a healthy sweep changes nothing
        f.supervisor.health_check().await;
        let before = f.transport.calls();

        f.transport.drop_connection("p1");
        f.supervisor.health_check().await;

        let after = f.transport.calls()[before.len()..].to_vec();
        assert_eq!(
            after,
            [
                Call::StopScan,
                Call::Disconnect("p1".to_string()),
                Call::StartScan
            ]
        );
        assert!(f.supervisor.tracked.is_empty());
    }

    #[tokio::test]
    async fn health_check_does_not_rescan_while_unpowered() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        f.transport.drop_connection("p1");

        let before = f.transport.calls();
        f.supervisor.health_check().await;
        assert_eq!(f.transport.calls(), before);
    }

    #[tokio::test]
    async fn adapter_down_disconnects_everything() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::AdapterUp)
            .await;
        f.supervisor
            .handle_event(TransportEvent::Discovered(advertisement("p1")))
            .await;
        f.supervisor.handle_event(TransportEvent::AdapterDown).await;
        assert!(f.supervisor.tracked.is_empty());
        assert!(
            f.transport
                .calls()
                .contains(&Call::Disconnect("p1".to_string()))
        );
    }

    #[tokio::test]
    async fn recognized_notification_mutates_and_dispatches() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::Notification {
                peripheral: "p1".to_string(),
                payload: vec![0, 198],
            })
            .await;
        assert_eq!(f.engine.current(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.client.batches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unrecognized_notification_is_dropped() {
        let mut f = fixture(MockTransport::default());
        f.supervisor
            .handle_event(TransportEvent::Notification {
                peripheral: "p1".to_string(),
                payload: vec![1, 2, 42],
            })
            .await;
        assert_eq!(f.engine.current(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.client.batches.lock().unwrap().is_empty());
    }
}

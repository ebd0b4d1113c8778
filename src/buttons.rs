// buttons.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::scene::SceneEngine;

const CLICK: u8 = 198;
const DOUBLE_CLICK: u8 = 199;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Click,
    DoubleClick,
}

impl ButtonEvent {
    /// Decodes the event from the last byte of a notification payload.
    /// Unrecognized codes and empty payloads carry no event.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload.last()? {
            &CLICK => Some(Self::Click),
            &DOUBLE_CLICK => Some(Self::DoubleClick),
            _ => None,
        }
    }
}

/// Turns recognized button events into scene mutations and schedules at
/// most one deferred scene application, letting rapid events coalesce onto
/// the final scene value before dispatch.
pub struct Debouncer {
    engine: Arc<SceneEngine>,
    dispatcher: Arc<Dispatcher>,
    delay: Duration,
}

impl Debouncer {
    pub fn new(engine: Arc<SceneEngine>, dispatcher: Arc<Dispatcher>, delay: Duration) -> Self {
        Self {
            engine,
            dispatcher,
            delay,
        }
    }

    /// Mutates the scene immediately; schedules a dispatch only if none is
    /// pending. An event landing during an in-flight window still moves
    /// the scene, and the already-scheduled application picks it up.
    pub fn handle(&self, event: ButtonEvent) {
        let scene = match event {
            ButtonEvent::Click => self.engine.advance(1),
            ButtonEvent::DoubleClick => {
                self.engine.advance(-1);
                self.engine.advance(-1)
            }
        };
        debug!(?event, scene, "button event");

        if self.dispatcher.try_begin() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                dispatcher.apply_scene().await;
            });
        }
    }
}

// scene.rs
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::{Value, json};

const SCENE_COUNT: u8 = 4;
const EFFECT_SUDDEN: &str = "sudden";
const EFFECT_SUDDEN_DELAY: u64 = 0;
const SOFT_TEMP: u32 = 3500;
const POWER_ON: &str = "on";
const POWER_OFF: &str = "off";

/// One lamp protocol invocation: a method name plus its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl Command {
    fn new(method: &'static str, params: Vec<Value>) -> Self {
        Self { method, params }
    }

    fn set_power(state: &str) -> Self {
        Self::new(
            "set_power",
            vec![json!(state), json!(EFFECT_SUDDEN), json!(EFFECT_SUDDEN_DELAY)],
        )
    }

    fn set_ct(temperature: u32) -> Self {
        Self::new(
            "set_ct_abx",
            vec![
                json!(temperature),
                json!(EFFECT_SUDDEN),
                json!(EFFECT_SUDDEN_DELAY),
            ],
        )
    }

    fn set_bright(level: u8) -> Self {
        Self::new(
            "set_bright",
            vec![json!(level), json!(EFFECT_SUDDEN), json!(EFFECT_SUDDEN_DELAY)],
        )
    }
}

/// The ordered commands destined for one lamp endpoint during one scene
/// application. Order is significant (power precedes brightness).
#[derive(Debug, Clone)]
pub struct Batch {
    pub endpoint: SocketAddr,
    pub commands: Vec<Command>,
}

/// Cyclic scene index in [1, 4]. Initial value is 1; the only mutation is
/// `advance`, which wraps and never produces a value outside the range.
pub struct SceneEngine {
    scene: AtomicU8,
    lamps: [SocketAddr; 2],
}

impl SceneEngine {
    pub fn new(lamps: [SocketAddr; 2]) -> Self {
        Self {
            scene: AtomicU8::new(1),
            lamps,
        }
    }

    pub fn current(&self) -> u8 {
        self.scene.load(Ordering::SeqCst)
    }

    /// Steps the scene by `delta` (expected ±1) with wrap-around, returning
    /// the new value.
    pub fn advance(&self, delta: i8) -> u8 {
        let prev = self
            .scene
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                Some(wrap(s, delta))
            })
            .unwrap_or_else(|s| s);
        wrap(prev, delta)
    }

    /// The command fan-out for the current scene: one batch per endpoint.
    pub fn current_commands(&self) -> Vec<Batch> {
        let [first, second] = self.lamps;
        match self.current() {
            // soft lamp
            1 => both(self.lamps, full_light(100)),
            // night lamp
            2 => both(self.lamps, full_light(1)),
            // baby time: night light on the first lamp only
            3 => vec![
                Batch {
                    endpoint: first,
                    commands: full_light(1),
                },
                Batch {
                    endpoint: second,
                    commands: vec![Command::set_power(POWER_OFF)],
                },
            ],
            // off
            _ => both(self.lamps, vec![Command::set_power(POWER_OFF)]),
        }
    }
}

fn wrap(scene: u8, delta: i8) -> u8 {
    let zero_based = (i16::from(scene) - 1 + i16::from(delta)).rem_euclid(i16::from(SCENE_COUNT));
    zero_based as u8 + 1
}

fn full_light(brightness: u8) -> Vec<Command> {
    vec![
        Command::set_power(POWER_ON),
        Command::set_ct(SOFT_TEMP),
        Command::set_bright(brightness),
    ]
}

fn both(lamps: [SocketAddr; 2], commands: Vec<Command>) -> Vec<Batch> {
    lamps
        .into_iter()
        .map(|endpoint| Batch {
            endpoint,
            commands: commands.clone(),
        })
        .collect()
}

// config/mod.rs
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use config::Config;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub button: ButtonSettings,
    pub lamps: LampSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonSettings {
    pub name_filters: Vec<String>,
    pub debounce_ms: u64,
    pub health_check_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LampSettings {
    pub first: IpAddr,
    pub second: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Compiled defaults, overridable by an optional config file and
    /// APP-prefixed environment variables.
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .set_default("button.name_filters", vec!["TrackerPA".to_string()])?
            .set_default("button.debounce_ms", 300_i64)?
            .set_default("button.health_check_ms", 5000_i64)?
            .set_default("lamps.first", "192.168.1.143")?
            .set_default("lamps.second", "192.168.1.144")?
            .set_default("lamps.port", 55443_i64)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9100_i64)?
            .add_source(config::File::with_name("config/config").required(false))
            .add_source(config::Environment::with_prefix("APP"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn lamp_endpoints(&self) -> [SocketAddr; 2] {
        [
            SocketAddr::new(self.lamps.first, self.lamps.port),
            SocketAddr::new(self.lamps.second, self.lamps.port),
        ]
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.button.debounce_ms)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.button.health_check_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_fixed_deployment() {
        let settings = Settings::new().unwrap();
        assert_eq!(settings.button.name_filters, ["TrackerPA"]);
        assert_eq!(settings.debounce(), Duration::from_millis(300));
        assert_eq!(settings.health_check(), Duration::from_millis(5000));
        let [first, second] = settings.lamp_endpoints();
        assert_eq!(first.port(), 55443);
        assert_eq!(second.port(), 55443);
        assert_ne!(first.ip(), second.ip());
        assert!(!settings.metrics.enabled);
    }
}

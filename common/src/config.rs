use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Intervals must stay well inside the 32-bit tick wrap so that
/// `wrapping_sub` yields an unambiguous elapsed time.
pub const MAX_INTERVAL_MS: u32 = u32::MAX / 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick_interval_ms must be greater than zero")]
    ZeroTick,
    #[error("debounce_ms ({debounce_ms}) must exceed tick_interval_ms ({tick_interval_ms})")]
    DebounceNotAboveTick {
        debounce_ms: u32,
        tick_interval_ms: u32,
    },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("{name} ({value} ms) exceeds half the tick counter range")]
    IntervalTooLong { name: &'static str, value: u32 },
    #[error("log_capacity must be greater than zero")]
    ZeroLogCapacity,
    #[error("mqtt_host cannot be empty")]
    EmptyMqttHost,
    #[error("mqtt_port must be between 1 and 65535")]
    InvalidMqttPort,
    #[error("unknown timezone `{0}`")]
    InvalidTimezone(String),
}

fn default_tick_interval_ms() -> u32 {
    10
}

fn default_debounce_ms() -> u32 {
    500
}

fn default_relay_delay_ms() -> u32 {
    90 * 1_000
}

fn default_max_on_time_ms() -> u32 {
    6 * 3_600 * 1_000
}

fn default_log_capacity() -> usize {
    64
}

/// Timing for the relay core. Loaded once at boot.
///
/// `min_off_time_ms` has no default: the short-cycle threshold must be chosen
/// for the installed boiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    #[serde(default = "default_relay_delay_ms")]
    pub relay_delay_ms: u32,
    #[serde(default = "default_max_on_time_ms")]
    pub max_on_time_ms: u32,
    pub min_off_time_ms: u32,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl RelayConfig {
    pub fn with_min_off_time(min_off_time_ms: u32) -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            debounce_ms: default_debounce_ms(),
            relay_delay_ms: default_relay_delay_ms(),
            max_on_time_ms: default_max_on_time_ms(),
            min_off_time_ms,
            log_capacity: default_log_capacity(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.debounce_ms <= self.tick_interval_ms {
            return Err(ConfigError::DebounceNotAboveTick {
                debounce_ms: self.debounce_ms,
                tick_interval_ms: self.tick_interval_ms,
            });
        }
        if self.relay_delay_ms == 0 {
            return Err(ConfigError::ZeroInterval("relay_delay_ms"));
        }
        if self.max_on_time_ms == 0 {
            return Err(ConfigError::ZeroInterval("max_on_time_ms"));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::ZeroLogCapacity);
        }

        let intervals = [
            ("debounce_ms", self.debounce_ms),
            ("relay_delay_ms", self.relay_delay_ms),
            ("max_on_time_ms", self.max_on_time_ms),
            ("min_off_time_ms", self.min_off_time_ms),
        ];
        for (name, value) in intervals {
            if value > MAX_INTERVAL_MS {
                return Err(ConfigError::IntervalTooLong { name, value });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hostname: String,
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub keep_alive_sec: u64,
    pub publish_interval_ms: u64,
    pub watchdog_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: "MiereBine".to_string(),
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            keep_alive_sec: 60,
            publish_interval_ms: 1_000,
            watchdog_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardwareConfig {
    pub input_pin: i32,
    pub relay_pin: i32,
    pub input_active_low: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            input_pin: 5,
            relay_pin: 4,
            input_active_low: true,
        }
    }
}

fn default_timezone() -> String {
    "Europe/Bucharest".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub relay: RelayConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl RuntimeConfig {
    pub fn new(relay: RelayConfig) -> Self {
        Self {
            relay,
            network: NetworkConfig::default(),
            timezone: default_timezone(),
            hardware: HardwareConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;

        if self.network.mqtt_host.trim().is_empty() {
            return Err(ConfigError::EmptyMqttHost);
        }
        if self.network.mqtt_port == 0 {
            return Err(ConfigError::InvalidMqttPort);
        }
        if self.network.publish_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("publish_interval_ms"));
        }
        if self.network.watchdog_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("watchdog_interval_ms"));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidTimezone(self.timezone.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_follow_firmware_timing() {
        let relay = RelayConfig::with_min_off_time(120_000);
        assert_eq!(relay.tick_interval_ms, 10);
        assert_eq!(relay.debounce_ms, 500);
        assert_eq!(relay.relay_delay_ms, 90_000);
        assert_eq!(relay.max_on_time_ms, 21_600_000);
        assert_eq!(relay.validate(), Ok(()));
    }

    #[test]
    fn min_off_time_is_required_in_json() {
        let missing = serde_json::from_str::<RelayConfig>(r#"{"relay_delay_ms": 120000}"#);
        assert!(missing.is_err());

        let present: RelayConfig =
            serde_json::from_str(r#"{"min_off_time_ms": 300000}"#).unwrap();
        assert_eq!(present, RelayConfig::with_min_off_time(300_000));
    }

    #[test]
    fn debounce_must_exceed_tick() {
        let mut relay = RelayConfig::with_min_off_time(0);
        relay.debounce_ms = 10;
        assert_eq!(
            relay.validate(),
            Err(ConfigError::DebounceNotAboveTick {
                debounce_ms: 10,
                tick_interval_ms: 10,
            })
        );
    }

    #[test]
    fn rejects_intervals_near_wrap() {
        let mut relay = RelayConfig::with_min_off_time(0);
        relay.max_on_time_ms = u32::MAX;
        assert_eq!(
            relay.validate(),
            Err(ConfigError::IntervalTooLong {
                name: "max_on_time_ms",
                value: u32::MAX,
            })
        );
    }

    #[test]
    fn runtime_config_parses_partial_json() {
        let runtime: RuntimeConfig = serde_json::from_str(
            r#"{"relay": {"min_off_time_ms": 120000}, "network": {"mqtt_host": "broker.lan"}}"#,
        )
        .unwrap();

        assert_eq!(runtime.network.mqtt_host, "broker.lan");
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.timezone, "Europe/Bucharest");
        assert_eq!(runtime.hardware, HardwareConfig::default());
        assert!(runtime.validate().is_ok());
    }

    #[test]
    fn rejects_zero_publish_interval() {
        let mut runtime = RuntimeConfig::new(RelayConfig::with_min_off_time(0));
        runtime.network.publish_interval_ms = 0;
        assert_eq!(
            runtime.validate(),
            Err(ConfigError::ZeroInterval("publish_interval_ms"))
        );
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut runtime = RuntimeConfig::new(RelayConfig::with_min_off_time(0));
        runtime.timezone = "Mars/Olympus".to_string();
        assert_eq!(
            runtime.validate(),
            Err(ConfigError::InvalidTimezone("Mars/Olympus".to_string()))
        );
    }
}

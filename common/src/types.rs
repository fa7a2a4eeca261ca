use serde::{Deserialize, Serialize};

/// Monotonic millisecond counter. Wraps after ~49.7 days.
pub type Tick = u32;

/// Wall-clock time in Unix seconds. Only used to stamp log records.
pub type WallTime = i64;

/// Milliseconds elapsed from `since` to `now`, correct across a counter wrap.
pub fn elapsed_ms(now: Tick, since: Tick) -> u32 {
    now.wrapping_sub(since)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    Off,
    DelayedOn,
    On,
    SafetyLockout,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::DelayedOn => "DELAYED_ON",
            Self::On => "ON",
            Self::SafetyLockout => "SAFETY_LOCKOUT",
        }
    }

    /// The output relay is energized in exactly one state.
    pub fn is_energized(self) -> bool {
        self == Self::On
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCode {
    DeviceOn,
    InputRelayOn,
    InputRelayOff,
    OutputRelayOn,
    OutputRelayOff,
    MqttDisconnected,
    MqttConnected,
    MqttConnectError,
    MqttPublishError,
    MaxRuntimeProtection,
    ShortCycleDetected,
}

impl EventCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceOn => "deviceOn",
            Self::InputRelayOn => "inputRelayOn",
            Self::InputRelayOff => "inputRelayOff",
            Self::OutputRelayOn => "outputRelayOn",
            Self::OutputRelayOff => "outputRelayOff",
            Self::MqttDisconnected => "mqttDisconnected",
            Self::MqttConnected => "mqttConnected",
            Self::MqttConnectError => "mqttConnectError",
            Self::MqttPublishError => "mqttPublishError",
            Self::MaxRuntimeProtection => "maxRuntimeProtection",
            Self::ShortCycleDetected => "shortCycleDetected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: WallTime,
    pub code: EventCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub state: RelayState,
    pub relay_energized: bool,
    pub input_active: bool,
    pub state_elapsed_ms: u32,
    pub on_remaining_ms: u32,
}

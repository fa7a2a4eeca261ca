use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::types::{elapsed_ms, EventCode, LogRecord, RelayStatus, Tick, WallTime};

/// 2020-01-01T00:00:00Z. Earlier wall-clock values mean SNTP has not synced yet.
pub const WALL_CLOCK_SYNC_EPOCH: WallTime = 1_577_836_800;

pub fn is_wall_clock_synced(wall: WallTime) -> bool {
    wall >= WALL_CLOCK_SYNC_EPOCH
}

pub fn format_local_time(wall: WallTime, tz: Tz) -> Option<String> {
    if !is_wall_clock_synced(wall) {
        return None;
    }
    let utc = DateTime::from_timestamp(wall, 0)?;
    Some(utc.with_timezone(&tz).to_rfc3339())
}

/// Tracks MQTT link health and turns client observations into log events.
/// It has no access to the relay.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    watchdog_interval_ms: u32,
    connected: bool,
    last_connect_error_ms: Option<Tick>,
}

impl LinkMonitor {
    pub fn new(watchdog_interval_ms: u64) -> Self {
        Self {
            watchdog_interval_ms: u32::try_from(watchdog_interval_ms).unwrap_or(u32::MAX),
            connected: false,
            last_connect_error_ms: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn on_connected(&mut self) -> Option<EventCode> {
        self.last_connect_error_ms = None;
        if self.connected {
            return None;
        }
        self.connected = true;
        Some(EventCode::MqttConnected)
    }

    /// A failed poll. Losing an established link is always reported; failed
    /// reconnect attempts are reported at most once per watchdog interval.
    pub fn on_connection_error(&mut self, now: Tick) -> Option<EventCode> {
        if self.connected {
            self.connected = false;
            self.last_connect_error_ms = Some(now);
            return Some(EventCode::MqttDisconnected);
        }

        let due = self
            .last_connect_error_ms
            .map(|last| elapsed_ms(now, last) >= self.watchdog_interval_ms)
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_connect_error_ms = Some(now);
        Some(EventCode::MqttConnectError)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    pub state: &'static str,
    #[serde(rename = "relayOn")]
    pub relay_on: bool,
    #[serde(rename = "inputOn")]
    pub input_on: bool,
    #[serde(rename = "stateElapsedMs")]
    pub state_elapsed_ms: u32,
    #[serde(rename = "onRemainingMs")]
    pub on_remaining_ms: u32,
    #[serde(rename = "shortCycleHold")]
    pub short_cycle_hold: bool,
    #[serde(rename = "mqttConnected")]
    pub mqtt_connected: bool,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
}

impl StatePayload {
    pub fn new(
        status: RelayStatus,
        short_cycle_hold: bool,
        mqtt_connected: bool,
        wall: WallTime,
    ) -> Self {
        Self {
            state: status.state.as_str(),
            relay_on: status.relay_energized,
            input_on: status.input_active,
            state_elapsed_ms: status.state_elapsed_ms,
            on_remaining_ms: status.on_remaining_ms,
            short_cycle_hold,
            mqtt_connected,
            time_synced: is_wall_clock_synced(wall),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntryPayload {
    pub time: WallTime,
    pub code: &'static str,
    #[serde(rename = "localTime", skip_serializing_if = "Option::is_none")]
    pub local_time: Option<String>,
}

pub fn log_payload(records: &[LogRecord], tz: Tz) -> Vec<LogEntryPayload> {
    records
        .iter()
        .map(|record| LogEntryPayload {
            time: record.time,
            code: record.code.as_str(),
            local_time: format_local_time(record.time, tz),
        })
        .collect()
}

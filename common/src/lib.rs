pub mod config;
pub mod debounce;
pub mod event_log;
pub mod relay;
pub mod scheduler;
pub mod telemetry;
pub mod topics;
pub mod types;

pub use config::{ConfigError, HardwareConfig, NetworkConfig, RelayConfig, RuntimeConfig};
pub use debounce::Debouncer;
pub use event_log::{EventLog, SharedEventLog};
pub use relay::{RelayAction, RelayController};
pub use scheduler::{RelayOutput, TickDriver, Transition};
pub use telemetry::{LinkMonitor, LogEntryPayload, StatePayload};
pub use topics::*;
pub use types::{EventCode, LogRecord, RelayState, RelayStatus, Tick, WallTime};

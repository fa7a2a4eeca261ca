pub const TOPIC_STATE: &str = "boiler/state";
pub const TOPIC_LOG: &str = "boiler/log";
pub const TOPIC_STATUS: &str = "boiler/status";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

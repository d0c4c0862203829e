pub const VERSION: &str = "v0.1.0";

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";
#[cfg(debug_assertions)]
pub const CONFIGFILE_PATH: &str = "relay-gateway.conf";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";
#[cfg(not(debug_assertions))]
pub const CONFIGFILE_PATH: &str = "/etc/relay-gateway.conf";

pub const USER_AGENT: &str = "relay-gateway/0.1.0";

// 3 consecutive SRP failures close the connection (spec: auth errors).
pub const MAX_SRP_FAILURES: u8 = 3;

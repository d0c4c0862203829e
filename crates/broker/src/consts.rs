#[cfg(debug_assertions)]
pub const CONFIGFILE_PATH: &str = "relay-broker.conf";
#[cfg(not(debug_assertions))]
pub const CONFIGFILE_PATH: &str = "/etc/relay-broker.conf";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const USER_AGENT: &str = "relay-broker/0.1.0";

/// Registrations idle for longer than this are eligible for reclamation.
pub const DEFAULT_RECLAIM_DAYS: i64 = 30;

/// How often the reclamation sweep runs.
pub const RECLAIM_SWEEP_SECS: u64 = 3600;

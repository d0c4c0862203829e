use std::{
    fs::read_to_string,
    sync::{Arc, OnceLock, RwLock},
};

use crate::consts::{CONFIGFILE_PATH, DEFAULT_RECLAIM_DAYS};

/// Broker configuration: where to listen, where the registration database
/// lives, and the reclamation/liveness policy.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: Option<String>,
    pub listen_port: Option<u16>,
    pub data_dir: Option<String>,
    pub reclaim_days: Option<i64>,
    pub ping_interval_secs: Option<u64>,
    pub pong_timeout_secs: Option<u64>,
}

impl BrokerConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn listen_sockaddr(&self) -> std::net::SocketAddr {
        let addr = self.listen_addr.as_deref().unwrap_or("0.0.0.0");
        let port = self.listen_port.unwrap_or(8080);
        format!("{addr}:{port}")
            .parse()
            .expect("invalid listen_addr/listen_port in configuration")
    }

    pub fn database_path(&self) -> std::path::PathBuf {
        let dir = self.data_dir.as_deref().unwrap_or(".");
        std::path::Path::new(dir).join("registrations.sqlite3")
    }

    pub fn reclaim_days(&self) -> i64 {
        self.reclaim_days.unwrap_or(DEFAULT_RECLAIM_DAYS)
    }

    pub fn ping_interval_secs(&self) -> u64 {
        self.ping_interval_secs.unwrap_or(30)
    }

    pub fn pong_timeout_secs(&self) -> u64 {
        self.pong_timeout_secs.unwrap_or(60)
    }
}

pub fn get() -> Arc<RwLock<BrokerConfig>> {
    static BROKER_CONFIG: OnceLock<Arc<RwLock<BrokerConfig>>> = OnceLock::new();

    BROKER_CONFIG
        .get_or_init(|| {
            if let Ok(config_str) = read_to_string(CONFIGFILE_PATH) {
                let config = BrokerConfig::from_toml_str(&config_str)
                    .expect("Failed to parse broker configuration file");
                Arc::new(RwLock::new(config))
            } else {
                Arc::new(RwLock::new(BrokerConfig {
                    listen_addr: None,
                    listen_port: None,
                    data_dir: None,
                    reclaim_days: None,
                    ping_interval_secs: None,
                    pong_timeout_secs: None,
                }))
            }
        })
        .clone()
}

use std::{
    fs::read_to_string,
    sync::{Arc, OnceLock, RwLock},
};

use relay_protocol::consts::{DEFAULT_HEARTBEAT_SECS, DEFAULT_UPLOAD_CHUNK_SIZE};

use crate::consts::CONFIGFILE_PATH;

/// Origin-side gateway configuration. `remote_access_username`/`salt`/
/// `verifier` are absent when remote access is disabled, in which case the
/// gateway starts every connection directly in `authenticated` with an empty
/// session key (plaintext allowed, per the handshake design).
#[derive(serde::Deserialize, Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: Option<String>,
    pub listen_port: Option<u16>,
    pub remote_access_username: Option<String>,
    pub remote_access_salt_b64: Option<String>,
    pub remote_access_verifier_b64: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub upload_chunk_size: Option<usize>,
    pub http_mux_base_url: String,
}

impl GatewayConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn listen_sockaddr(&self) -> std::net::SocketAddr {
        let addr = self.listen_addr.as_deref().unwrap_or("0.0.0.0");
        let port = self.listen_port.unwrap_or(8443);
        format!("{addr}:{port}")
            .parse()
            .expect("invalid listen_addr/listen_port in configuration")
    }

    pub fn remote_access_enabled(&self) -> bool {
        self.remote_access_username.is_some()
    }

    pub fn heartbeat_secs(&self) -> u64 {
        self.heartbeat_secs.unwrap_or(DEFAULT_HEARTBEAT_SECS)
    }

    pub fn upload_chunk_size(&self) -> usize {
        self.upload_chunk_size.unwrap_or(DEFAULT_UPLOAD_CHUNK_SIZE)
    }
}

pub fn get() -> Arc<RwLock<GatewayConfig>> {
    static GATEWAY_CONFIG: OnceLock<Arc<RwLock<GatewayConfig>>> = OnceLock::new();

    GATEWAY_CONFIG
        .get_or_init(|| {
            if let Ok(config_str) = read_to_string(CONFIGFILE_PATH) {
                let config = GatewayConfig::from_toml_str(&config_str)
                    .expect("Failed to parse gateway configuration file");
                Arc::new(RwLock::new(config))
            } else {
                Arc::new(RwLock::new(GatewayConfig {
                    listen_addr: None,
                    listen_port: None,
                    remote_access_username: None,
                    remote_access_salt_b64: None,
                    remote_access_verifier_b64: None,
                    heartbeat_secs: None,
                    upload_chunk_size: None,
                    http_mux_base_url: "http://127.0.0.1:0".to_string(),
                }))
            }
        })
        .clone()
}

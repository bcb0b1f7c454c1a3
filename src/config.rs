use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub remote_base_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub server_id: String,
    pub request_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub demo_traffic_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let database_url = env::var("TRUSTSYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://trustsync.db?mode=rwc".to_string());

        let remote_base_url = env::var("TRUSTSYNC_REMOTE_URL").ok();

        let server_host = env::var("TRUSTSYNC_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("TRUSTSYNC_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        let server_id = env::var("TRUSTSYNC_SERVER_ID")
            .unwrap_or_else(|_| "securecypher-01".to_string());

        let request_timeout_secs = env::var("TRUSTSYNC_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;

        let reconcile_interval_secs = env::var("TRUSTSYNC_RECONCILE_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?;

        let demo_traffic_interval_secs = env::var("TRUSTSYNC_DEMO_TRAFFIC_INTERVAL_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()?;

        Ok(AppConfig {
            database_url,
            remote_base_url,
            server_host,
            server_port,
            server_id,
            request_timeout_secs,
            reconcile_interval_secs,
            demo_traffic_interval_secs,
        })
    }
}

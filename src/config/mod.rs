use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::poller::PollPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the analysis backend (e.g., "http://localhost:8000/api/v1")
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Delay between two status queries for the same job
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Status queries issued before giving up on a job
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Per-request timeout for backend calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where the session token and user descriptor are persisted
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

fn default_api_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_max_attempts() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".envx_session.json")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            session_file: default_session_file(),
        }
    }
}

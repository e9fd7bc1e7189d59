use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IDENTITY_DB: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Origin serving `/api/anomalies` and `/api/autofixes`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout applied by the HTTP client.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// SQLite path for synthesized record identities. `:memory:` keeps
    /// them for the lifetime of the process only.
    #[serde(default = "default_identity_db")]
    pub identity_db: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_identity_db() -> String {
    DEFAULT_IDENTITY_DB.to_string()
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            api_base_url:         default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            identity_db:          default_identity_db(),
        }
    }
}

impl DeskConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    /// In tests, use DeskConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DeskConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with hardcoded values for use in tests.
    pub fn default_test() -> Self {
        Self {
            api_base_url:         "http://127.0.0.1:0".into(),
            request_timeout_secs: 1,
            identity_db:          ":memory:".into(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            anyhow::bail!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

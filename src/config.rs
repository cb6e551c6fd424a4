use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::is_local_endpoint_url;

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_ASSISTANT_TYPE: &str = "general";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub assistant_type: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            assistant_type: DEFAULT_ASSISTANT_TYPE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_url =
            std::env::var("AGENTRUN_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_token = std::env::var("AGENTRUN_API_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let assistant_type = std::env::var("AGENTRUN_ASSISTANT")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_ASSISTANT_TYPE.to_string());
        let request_timeout_secs = match std::env::var("AGENTRUN_REQUEST_TIMEOUT_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => bail!("Invalid AGENTRUN_REQUEST_TIMEOUT_SECS '{raw}': expected seconds"),
            },
            Err(_) => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            api_token,
            assistant_type,
            request_timeout_secs,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid AGENTRUN_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        if !self.is_local_endpoint() && self.api_token.is_none() {
            bail!(
                "AGENTRUN_API_TOKEN must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.request_timeout_secs == 0 {
            bail!("AGENTRUN_REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}

// ⚙️ Configuration - environment variables with logged defaults

use anyhow::{anyhow, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::chat::PollConfig;
use crate::invites::InvitePolicy;

pub const DEFAULT_DB_PATH: &str = "realty-portal.db";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub assistant_id: Option<String>,
    pub openai_base_url: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub test_codes: Vec<String>,
    pub default_realtor_id: Option<String>,
    pub contact_relay_url: Option<String>,
}

impl Config {
    /// Read configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let poll_interval_ms: u64 =
            try_load(&lookup, "PORTAL_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let poll_max_attempts: u32 =
            try_load(&lookup, "PORTAL_POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?;

        if poll_max_attempts == 0 {
            return Err(anyhow!("PORTAL_POLL_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Config {
            db_path: PathBuf::from(try_load(&lookup, "PORTAL_DB_PATH", DEFAULT_DB_PATH.to_string())?),
            port: try_load(&lookup, "PORTAL_PORT", DEFAULT_PORT)?,
            openai_api_key: optional(&lookup, "OPENAI_API_KEY"),
            assistant_id: optional(&lookup, "OPENAI_ASSISTANT_ID"),
            openai_base_url: try_load(
                &lookup,
                "OPENAI_BASE_URL",
                DEFAULT_OPENAI_BASE_URL.to_string(),
            )?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_max_attempts,
            test_codes: optional(&lookup, "PORTAL_TEST_CODES")
                .map(|list| {
                    list.split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            default_realtor_id: optional(&lookup, "PORTAL_DEFAULT_REALTOR"),
            contact_relay_url: optional(&lookup, "CONTACT_RELAY_URL"),
        })
    }

    pub fn invite_policy(&self) -> InvitePolicy {
        InvitePolicy::new(&self.test_codes, self.default_realtor_id.clone())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_attempts: self.poll_max_attempts,
        }
    }
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn try_load<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("Invalid {key} value {raw:?}: {e}")
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

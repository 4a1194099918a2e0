// 📮 Contact Relay - forward the public contact form to a form-relay service

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::schema::{describe, validate_contact, ValidationError};

/// Give up on the relay after this long
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Contact relay is not configured (CONTACT_RELAY_URL)")]
    NotConfigured,

    #[error("Invalid contact form: {}", describe(.0))]
    Invalid(Vec<ValidationError>),

    #[error("Contact relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Contact relay rejected the form with status {0}")]
    Rejected(u16),
}

pub struct ContactRelay {
    http: Client,
    url: String,
}

impl ContactRelay {
    pub fn new(url: String) -> Result<Self, RelayError> {
        let http = Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(ContactRelay { http, url })
    }

    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let url = config
            .contact_relay_url
            .clone()
            .ok_or(RelayError::NotConfigured)?;
        Self::new(url)
    }

    pub async fn submit(&self, form: &ContactForm) -> Result<(), RelayError> {
        validate_contact(form).map_err(RelayError::Invalid)?;

        let response = self.http.post(&self.url).form(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            warn!(status = status.as_u16(), "contact relay rejected form");
            return Err(RelayError::Rejected(status.as_u16()));
        }

        info!(email = %form.email, "contact form relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> ContactForm {
        ContactForm {
            name: "Jane".to_string(),
            email: "jane@example.com".to_string(),
            phone: None,
            message: "Looking for a 3 bedroom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invalid_form_never_leaves_the_process() {
        // Port 9 (discard) is never contacted because validation fails first
        let relay = ContactRelay::new("http://127.0.0.1:9/relay".to_string()).unwrap();

        let mut bad = form();
        bad.message = " ".to_string();
        bad.email = "jane".to_string();

        match relay.submit(&bad).await {
            Err(RelayError::Invalid(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(matches!(
            ContactRelay::from_config(&config),
            Err(RelayError::NotConfigured)
        ));
    }
}

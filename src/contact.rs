//! Outbound delivery of finished form submissions.
//!
//! The gateway never talks to Discord or email directly; it hands the
//! submission to the portfolio site's `/api/contact` endpoint, which owns
//! validation of the optional fields, rate limiting and delivery.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Discriminator the contact endpoint uses to tell terminal submissions
/// apart from the web form.
pub const SOURCE_SSH: &str = "ssh";

/// One completed contact form, as posted to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactForm {
    pub message: String,
    pub name: String,
    pub email: String,
    pub discord: String,
    pub phone: String,
    pub facebook: String,
    pub source: &'static str,
}

/// HTTP client for the contact endpoint.
pub struct ContactClient {
    client: reqwest::Client,
    api_url: String,
}

impl ContactClient {
    /// Create a new contact client with a bounded request timeout.
    pub fn new(api_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("contact-gateway/0.1")
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, api_url }
    }

    /// Submit a form to the contact endpoint.
    ///
    /// Returns `true` only for a 2xx response. Non-2xx statuses and
    /// transport errors (including timeouts) are logged and reported as
    /// `false`; the caller never sees a raw error.
    pub async fn submit(&self, form: &ContactForm) -> bool {
        debug!("Posting submission to {}", self.api_url);

        match self.client.post(&self.api_url).json(form).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Contact submission delivered");
                true
            }
            Ok(response) => {
                warn!(
                    "Contact endpoint returned {} for submission",
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Contact submission failed: {}", e);
                false
            }
        }
    }
}

//! Outbound email delivery.
//!
//! Callers hand an [`EmailMessage`] to an [`EmailDispatcher`] and get back
//! `Ok` only once the dispatcher has accepted it. A challenge is not reported
//! as sent until the dispatcher confirms, and what happens on failure is
//! decided by the caller.
//!
//! - [`LogEmailDispatcher`] logs messages instead of sending them (local dev).
//! - [`HttpEmailDispatcher`] posts JSON to a transactional email API.
//! - [`MemoryEmailDispatcher`] records messages and can be told to fail (tests).

pub mod templates;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};
use tracing::{debug, info, info_span, Instrument};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    /// Deliver a message, or return an error if delivery cannot be confirmed.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct LogEmailDispatcher;

#[async_trait]
impl EmailDispatcher for LogEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            "email dispatch stub"
        );
        debug!(body = %message.html_body, "email dispatch stub body");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    endpoint: Option<Url>,
    api_key: Option<SecretString>,
    from_address: String,
    timeout: Duration,
}

impl EmailConfig {
    /// Defaults: no API endpoint (log dispatcher), 10s timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            from_address: "Turnstile <no-reply@turnstile.dev>".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_from_address(mut self, from_address: String) -> Self {
        self.from_address = from_address;
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub const fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    #[must_use]
    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the dispatcher this config describes.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn dispatcher(&self) -> Result<std::sync::Arc<dyn EmailDispatcher>> {
        match &self.endpoint {
            Some(endpoint) => Ok(std::sync::Arc::new(HttpEmailDispatcher::new(
                endpoint.clone(),
                self.api_key.clone(),
                self.from_address.clone(),
                self.timeout,
            )?)),
            None => Ok(std::sync::Arc::new(LogEmailDispatcher)),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// JSON-over-HTTP transactional email client.
pub struct HttpEmailDispatcher {
    client: Client,
    endpoint: Url,
    api_key: Option<SecretString>,
    from_address: String,
}

impl HttpEmailDispatcher {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        api_key: Option<SecretString>,
        from_address: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build email HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from_address,
        })
    }
}

#[async_trait]
impl EmailDispatcher for HttpEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let body = OutboundEmail {
            from: &self.from_address,
            to: [&message.to_email],
            subject: &message.subject,
            html: &message.html_body,
        };
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let provider = self.endpoint.host_str().unwrap_or("unknown");
        let span = info_span!("email.send", email.provider = %provider);
        let response = request
            .send()
            .instrument(span)
            .await
            .context("email API request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("email API responded with {status}"));
        }
        Ok(())
    }
}

/// Records every message; optionally fails or stalls each send.
#[derive(Debug, Default)]
pub struct MemoryEmailDispatcher {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryEmailDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn sent_to(&self, to_email: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.to_email == to_email)
            .collect()
    }
}

#[async_trait]
impl EmailDispatcher for MemoryEmailDispatcher {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mail relay unavailable"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

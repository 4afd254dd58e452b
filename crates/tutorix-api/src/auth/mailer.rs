//! Outgoing account mail
//!
//! Confirmation links and activation codes are handed to a `Notifier`.
//! Delivery is best-effort: `MailDispatcher` sends on a background task and
//! only logs failures, so a broken relay never fails a registration.

use super::models::User;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use tutorix_core::MailConfig;

/// Mail delivery errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to build mail client: {0}")]
    ClientError(String),

    #[error("Mail relay request failed: {0}")]
    RequestFailed(String),

    #[error("Mail relay rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Template the receiving side renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailTemplate {
    /// Link carrying a signed confirmation token
    ConfirmEmail,
    /// Numeric activation code plus the page to enter it on
    ActivateAccount,
}

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub to: String,
    pub recipient_name: String,
    pub template: MailTemplate,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub subject: String,
}

impl MailMessage {
    /// Confirmation link mail; `{token}` in `url_template` is replaced
    pub fn confirmation(user: &User, token: &str, config: &MailConfig) -> Self {
        Self {
            to: user.email.clone(),
            recipient_name: user.full_name(),
            template: MailTemplate::ConfirmEmail,
            link: config.confirmation_url.replace("{token}", token),
            code: None,
            subject: config.confirmation_subject.clone(),
        }
    }

    /// Activation code mail
    pub fn activation(user: &User, code: &str, config: &MailConfig) -> Self {
        Self {
            to: user.email.clone(),
            recipient_name: user.full_name(),
            template: MailTemplate::ActivateAccount,
            link: config.activation_url.clone(),
            code: Some(code.to_string()),
            subject: config.activation_subject.clone(),
        }
    }
}

/// Delivers account mail
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            template = ?message.template,
            subject = %message.subject,
            "Mail relay not configured, message logged only"
        );
        debug!(link = %message.link, code = ?message.code, "Mail content");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a MailMessage,
}

/// Posts messages as JSON to an HTTP mail relay
pub struct HttpRelayNotifier {
    client: Client,
    relay_url: String,
    from_address: String,
}

impl HttpRelayNotifier {
    pub fn new(
        relay_url: impl Into<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            relay_url: relay_url.into(),
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        let request = RelayRequest {
            from: &self.from_address,
            message: &message,
        };

        let response = self
            .client
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MailError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        debug!(to = %message.to, template = ?message.template, "Mail accepted by relay");
        Ok(())
    }
}

/// Keeps every message in memory
///
/// Used when running without a relay in tests and local tooling.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<MailMessage>>,
    delivered: Notify,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().await.clone()
    }

    /// Wait until at least `count` messages were delivered
    pub async fn wait_for(&self, count: usize) -> Vec<MailMessage> {
        loop {
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            self.delivered.notified().await;
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        self.sent.lock().await.push(message);
        self.delivered.notify_one();
        Ok(())
    }
}

/// Build the notifier selected by configuration
pub fn notifier_from_config(config: &MailConfig) -> Result<Arc<dyn Notifier>, MailError> {
    match &config.relay_url {
        Some(url) => Ok(Arc::new(HttpRelayNotifier::new(
            url.clone(),
            config.from_address.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Fire-and-forget mail delivery
#[derive(Clone)]
pub struct MailDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl MailDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send `message` on a background task
    pub fn dispatch(&self, message: MailMessage) -> tokio::task::JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let to = message.to.clone();
            let template = message.template;
            if let Err(e) = notifier.send(message).await {
                warn!(to = %to, template = ?template, error = %e, "Failed to send mail");
            }
        })
    }
}

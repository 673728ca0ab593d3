//! Delivery channel providers.
//!
//! One logical notification fans out over independent external channels.
//! Each provider is a trait so the dispatcher never knows which vendor is
//! behind a channel, and tests can substitute recording or failing fakes:
//!
//! - [`push`]: Expo-compatible mobile push gateway
//! - [`email`]: HTTP mail relay
//! - [`sms`]: Twilio-compatible SMS API
//!
//! Providers return [`ChannelError`]; the dispatcher converts every error
//! into a per-recipient result, so one channel's outage never takes down
//! the others.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Notification, Severity};

pub mod email;
pub mod push;
pub mod sms;

pub use email::HttpMailerClient;
pub use push::ExpoPushClient;
pub use sms::TwilioSmsClient;

/// Errors from a channel provider call.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The provider answered and rejected the message.
    #[error("provider rejected the message: {0}")]
    Provider(String),

    /// The provider could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider call exceeded the dispatcher's per-call timeout.
    #[error("provider call timed out")]
    Timeout,

    /// The recipient address is unusable for this channel.
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),
}

/// One push message addressed to one device token.
///
/// Field names follow the Expo push API; other gateways accepting the
/// same shape work unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Device push token.
    pub to: String,

    pub title: String,

    pub body: String,

    /// Notification sound. Only critical notifications set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,

    /// Delivery priority. Only critical notifications raise it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// Structured payload for client-side routing.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl PushMessage {
    /// Render a notification for one device token.
    ///
    /// Critical severity turns the sound on and raises delivery priority;
    /// everything else ships silent at default priority. The notification
    /// type is injected into `data` so the mobile client can route taps.
    pub fn from_notification(to: &str, notification: &Notification) -> Self {
        let critical = notification.severity == Severity::Critical;

        let mut data = notification.data.clone();
        if let Ok(type_value) = serde_json::to_value(notification.notification_type) {
            data.insert("type".to_string(), type_value);
        }

        Self {
            to: to.to_string(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            sound: critical.then(|| "default".to_string()),
            priority: critical.then(|| "high".to_string()),
            data,
        }
    }
}

/// Receipt for one push message, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicket {
    /// `"ok"` or `"error"`.
    #[serde(default)]
    pub status: String,

    /// Gateway-assigned receipt id, present on success.
    #[serde(default)]
    pub id: Option<String>,

    /// Error description, present on failure.
    #[serde(default)]
    pub message: Option<String>,
}

impl PushTicket {
    /// Whether the gateway accepted the message.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// One email to one recipient.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: EmailBody,
}

/// Email body, rendered as HTML or plain text.
#[derive(Debug, Clone)]
pub enum EmailBody {
    Html(String),
    Text(String),
}

/// One SMS to one phone number.
#[derive(Debug, Clone)]
pub struct SmsMessage {
    /// Destination number, digits only.
    pub to: String,
    pub body: String,
}

/// Mobile push gateway.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Syntactic token validation, checked before a token is ever sent.
    fn is_valid_token(&self, token: &str) -> bool;

    /// Submit one chunk of messages. Tickets come back in submission
    /// order, one per message.
    async fn send_chunk(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<PushTicket>, ChannelError>;
}

/// Email relay.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send one email, returning the relay's message id.
    async fn send(&self, message: EmailMessage) -> Result<String, ChannelError>;
}

/// SMS gateway.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Send one SMS, returning the gateway's message id.
    async fn send(&self, message: SmsMessage) -> Result<String, ChannelError>;
}

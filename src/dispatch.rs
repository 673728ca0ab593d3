//! Multi-channel notification dispatch.
//!
//! # Fan-Out Shape
//!
//! One dispatch call fans out over two concurrent phases:
//!
//! - **Push phase**: every valid device token is collected, chunked to
//!   the gateway's batch limit, and submitted with bounded parallelism.
//!   A failed chunk fails only its own recipients.
//! - **Per-recipient phase**: email and SMS are attempted per recipient
//!   inside a bounded concurrency window; within one recipient the two
//!   attempts run in parallel.
//!
//! The phases merge into one result set per recipient, which is archived
//! to history and folded into a [`DispatchSummary`]. A recipient counts
//! as reached when any attempted channel succeeded. Nothing is retried
//! and nothing is cancelled mid-flight: partial delivery is the normal
//! failure mode, and the summary reports it fully.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channels::{
    ChannelError, EmailBody, EmailMessage, EmailTransport, PushMessage, PushProvider, PushTicket,
    SmsMessage, SmsProvider, push::PUSH_CHUNK_SIZE, sms::normalize_phone_number,
};
use crate::history::HistoryStore;
use crate::model::{
    Channel, DispatchResult, DispatchSummary, Notification, NotificationHistoryEntry, Recipient,
    Severity,
};

/// Hard upper bound for a rendered SMS body, in characters.
pub const SMS_MAX_CHARS: usize = 160;

/// Prefix stamped on critical SMS bodies.
const SMS_EMERGENCY_PREFIX: &str = "EMERGENCY: ";

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Hard timeout for any single provider call.
    pub provider_timeout: Duration,

    /// How many recipients run their email/SMS attempts at once.
    pub recipient_concurrency: usize,

    /// How many push chunks are in flight at once.
    pub chunk_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            recipient_concurrency: 16,
            chunk_concurrency: 4,
        }
    }
}

/// Errors that abort a dispatch before any channel is attempted.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The notification is malformed; nothing was attempted.
    #[error("invalid notification: {0}")]
    Validation(String),
}

/// Fans one notification out to many recipients over many channels.
#[derive(Clone)]
pub struct NotificationDispatcher {
    push: Arc<dyn PushProvider>,
    email: Arc<dyn EmailTransport>,
    sms: Arc<dyn SmsProvider>,
    history: Arc<dyn HistoryStore>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    /// Create a new dispatcher over the given providers.
    pub fn new(
        push: Arc<dyn PushProvider>,
        email: Arc<dyn EmailTransport>,
        sms: Arc<dyn SmsProvider>,
        history: Arc<dyn HistoryStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            push,
            email,
            sms,
            history,
            config,
        }
    }

    /// Dispatch one notification to a set of recipients.
    ///
    /// # Arguments
    ///
    /// * `notification` - What to deliver; immutable during the fan-out
    /// * `recipients` - Who to deliver to
    /// * `channels` - Which channels to attempt
    /// * `sender_id` - Who triggered the dispatch, for the history log
    ///
    /// # Returns
    ///
    /// A `DispatchSummary` of the whole fan-out. The only error is
    /// validation of the notification itself; provider failures are
    /// reported inside the summary, never as an `Err`.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        recipients: &[Recipient],
        channels: &[Channel],
        sender_id: &str,
    ) -> Result<DispatchSummary, DispatchError> {
        if notification.title.trim().is_empty() {
            return Err(DispatchError::Validation(
                "title must not be empty".to_string(),
            ));
        }
        if notification.body.trim().is_empty() {
            return Err(DispatchError::Validation(
                "body must not be empty".to_string(),
            ));
        }

        let mut summary = DispatchSummary {
            total_users: recipients.len(),
            ..Default::default()
        };
        if recipients.is_empty() {
            return Ok(summary);
        }

        // Preference filter, unless the notification is a critical
        // emergency (the life-safety bypass)
        let bypass = notification.bypasses_preferences();
        let mut targets: Vec<&Recipient> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if !bypass && !recipient.wants(notification.notification_type) {
                debug!(user_id = %recipient.id, "recipient opted out, skipping");
                summary.record_filtered();
            } else {
                targets.push(recipient);
            }
        }

        let want_push = channels.contains(&Channel::Push);
        let want_email = channels.contains(&Channel::Email);
        let want_sms = channels.contains(&Channel::Sms);

        // Push works on token batches; email and SMS go per recipient.
        // The two phases are independent and run concurrently.
        let (push_results, personal_results) = tokio::join!(
            self.push_phase(notification, &targets, want_push),
            self.personal_phase(notification, &targets, want_email, want_sms),
        );

        // Merge the phases into one result set per recipient
        for recipient in &targets {
            let mut results: Vec<DispatchResult> = Vec::new();
            if let Some(push_result) = push_results.get(recipient.id.as_str()) {
                results.push(push_result.clone());
            }
            if let Some(personal) = personal_results.get(recipient.id.as_str()) {
                results.extend(personal.iter().cloned());
            }

            if results.is_empty() {
                // None of the requested channels could carry anything to
                // this recipient. Counted failed, not archived
                warn!(user_id = %recipient.id, "no reachable channel");
                summary.record_unreachable();
                continue;
            }

            summary.record_results(&results);

            let entry = NotificationHistoryEntry::new(notification.clone(), results, sender_id);
            if let Err(e) = self.history.append(&recipient.id, entry).await {
                warn!(user_id = %recipient.id, error = %e, "failed to archive dispatch history");
            }
        }

        info!(
            total = summary.total_users,
            successful = summary.successful,
            failed = summary.failed,
            filtered = summary.filtered,
            "dispatch complete"
        );

        Ok(summary)
    }

    /// Batch push delivery: chunk valid tokens and submit concurrently.
    async fn push_phase(
        &self,
        notification: &Notification,
        targets: &[&Recipient],
        want_push: bool,
    ) -> HashMap<String, DispatchResult> {
        let mut results = HashMap::new();
        if !want_push {
            return results;
        }

        // A token that fails syntactic validation is treated as absent:
        // the gateway would reject the whole chunk, and the archive only
        // ever holds attempted channels
        let mut addressed: Vec<(String, PushMessage)> = Vec::new();
        for recipient in targets {
            let Some(token) = &recipient.push_token else {
                continue;
            };
            if !self.push.is_valid_token(token) {
                debug!(user_id = %recipient.id, "push token failed validation, skipping push");
                continue;
            }
            addressed.push((
                recipient.id.clone(),
                PushMessage::from_notification(token, notification),
            ));
        }

        if addressed.is_empty() {
            return results;
        }

        let chunks: Vec<Vec<(String, PushMessage)>> = addressed
            .chunks(PUSH_CHUNK_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();

        let outcomes: Vec<(Vec<String>, Result<Vec<PushTicket>, ChannelError>)> =
            stream::iter(chunks)
                .map(|chunk| async move {
                    let ids: Vec<String> = chunk.iter().map(|(id, _)| id.clone()).collect();
                    let messages: Vec<PushMessage> =
                        chunk.into_iter().map(|(_, message)| message).collect();
                    let outcome = self.call_push(messages).await;
                    (ids, outcome)
                })
                .buffer_unordered(self.config.chunk_concurrency)
                .collect()
                .await;

        for (ids, outcome) in outcomes {
            match outcome {
                Ok(tickets) => {
                    for (id, ticket) in ids.into_iter().zip(tickets) {
                        let result = if ticket.is_ok() {
                            DispatchResult::ok(Channel::Push, ticket.id)
                        } else {
                            DispatchResult::err(
                                Channel::Push,
                                ticket
                                    .message
                                    .unwrap_or_else(|| "push gateway rejected message".to_string()),
                            )
                        };
                        results.insert(id, result);
                    }
                }
                Err(e) => {
                    // Only this chunk's recipients are affected
                    warn!(error = %e, recipients = ids.len(), "push chunk failed");
                    for id in ids {
                        results.insert(id, DispatchResult::err(Channel::Push, e.to_string()));
                    }
                }
            }
        }

        results
    }

    async fn call_push(&self, messages: Vec<PushMessage>) -> Result<Vec<PushTicket>, ChannelError> {
        match timeout(self.config.provider_timeout, self.push.send_chunk(messages)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    /// Per-recipient email/SMS delivery with bounded concurrency.
    async fn personal_phase(
        &self,
        notification: &Notification,
        targets: &[&Recipient],
        want_email: bool,
        want_sms: bool,
    ) -> HashMap<String, Vec<DispatchResult>> {
        if !want_email && !want_sms {
            return HashMap::new();
        }

        // The futures are built before streaming: a closure borrowing
        // each recipient inside the stream adapter cannot satisfy the
        // lifetime-general Send bound the handler futures need.
        let deliveries: Vec<_> = targets
            .iter()
            .copied()
            .map(|recipient| async move {
                let results = self
                    .send_personal(notification, recipient, want_email, want_sms)
                    .await;
                (recipient.id.clone(), results)
            })
            .collect();

        stream::iter(deliveries)
            .buffer_unordered(self.config.recipient_concurrency)
            .collect()
            .await
    }

    /// Email and SMS for one recipient, attempted in parallel.
    async fn send_personal(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        want_email: bool,
        want_sms: bool,
    ) -> Vec<DispatchResult> {
        let email_attempt = async {
            match (&recipient.email, want_email) {
                (Some(address), true) => {
                    Some(self.send_email(notification, recipient, address).await)
                }
                _ => None,
            }
        };
        let sms_attempt = async {
            match (&recipient.phone_number, want_sms) {
                (Some(phone), true) => Some(self.send_sms(notification, phone).await),
                _ => None,
            }
        };

        let (email_result, sms_result) = tokio::join!(email_attempt, sms_attempt);
        email_result.into_iter().chain(sms_result).collect()
    }

    async fn send_email(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        address: &str,
    ) -> DispatchResult {
        let message = EmailMessage {
            to: address.to_string(),
            subject: notification.title.clone(),
            body: render_email_body(notification, recipient),
        };

        match timeout(self.config.provider_timeout, self.email.send(message)).await {
            Ok(Ok(id)) => DispatchResult::ok(Channel::Email, (!id.is_empty()).then_some(id)),
            Ok(Err(e)) => DispatchResult::err(Channel::Email, e.to_string()),
            Err(_) => DispatchResult::err(Channel::Email, ChannelError::Timeout.to_string()),
        }
    }

    async fn send_sms(&self, notification: &Notification, phone: &str) -> DispatchResult {
        let digits = normalize_phone_number(phone);
        if digits.is_empty() {
            return DispatchResult::err(Channel::Sms, "phone number has no digits");
        }

        let message = SmsMessage {
            to: digits,
            body: render_sms_body(notification),
        };

        match timeout(self.config.provider_timeout, self.sms.send(message)).await {
            Ok(Ok(id)) => DispatchResult::ok(Channel::Sms, (!id.is_empty()).then_some(id)),
            Ok(Err(e)) => DispatchResult::err(Channel::Sms, e.to_string()),
            Err(_) => DispatchResult::err(Channel::Sms, ChannelError::Timeout.to_string()),
        }
    }
}

/// Render the SMS body for a notification.
///
/// Critical severity gets the emergency prefix. Anything longer than
/// [`SMS_MAX_CHARS`] characters is truncated so that the result is
/// exactly [`SMS_MAX_CHARS`] characters ending in `...`; shorter bodies
/// pass through unmodified.
pub fn render_sms_body(notification: &Notification) -> String {
    let body = if notification.severity == Severity::Critical {
        format!("{}{}", SMS_EMERGENCY_PREFIX, notification.body)
    } else {
        notification.body.clone()
    };

    if body.chars().count() > SMS_MAX_CHARS {
        let mut truncated: String = body.chars().take(SMS_MAX_CHARS - 3).collect();
        truncated.push_str("...");
        truncated
    } else {
        body
    }
}

/// Render the email body for a notification.
///
/// A body containing markup is passed through as HTML. Plain bodies get
/// the standard text template: greeting, body text, and the structured
/// data flattened into bullet lines.
pub fn render_email_body(notification: &Notification, recipient: &Recipient) -> EmailBody {
    if notification.body.contains('<') {
        return EmailBody::Html(notification.body.clone());
    }

    let name = recipient.name.as_deref().unwrap_or("traveler");
    let mut text = format!("Hello {},\n\n{}\n", name, notification.body);

    if !notification.data.is_empty() {
        text.push('\n');
        for (key, value) in &notification.data {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.push_str(&format!("- {}: {}\n", key, rendered));
        }
    }

    text.push_str("\nStay safe,\nThe Beacon team\n");
    EmailBody::Text(text)
}

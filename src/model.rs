//! Core data models for Beacon.
//!
//! # Delivery Semantics
//!
//! A [`Notification`] is immutable once handed to the dispatcher: every
//! channel renders from the same value, so a partial failure can never
//! observe half-updated content. Each channel attempt produces a
//! [`DispatchResult`], and a recipient counts as reached when **any** of
//! their attempted channels succeeded. Per-recipient results are archived
//! as [`NotificationHistoryEntry`] values and rolled up into
//! [`DeliveryStats`] for reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The kind of event a notification describes.
///
/// Wire form is camelCase (`"checkIn"`, `"weatherAlert"`) to match the
/// mobile client payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    /// Active emergency involving the recipient or someone near them.
    Emergency,
    /// Scheduled check-in reminder or missed check-in.
    CheckIn,
    /// Severe weather affecting the recipient's area.
    WeatherAlert,
    /// Safety advisory for the recipient's area.
    SafetyUpdate,
    /// Geofence boundary crossing (entering/leaving a classified zone).
    Geofence,
    /// Platform housekeeping (account, maintenance, etc.).
    System,
}

impl NotificationType {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            NotificationType::Emergency => "Emergency",
            NotificationType::CheckIn => "Check-In",
            NotificationType::WeatherAlert => "Weather Alert",
            NotificationType::SafetyUpdate => "Safety Update",
            NotificationType::Geofence => "Geofence",
            NotificationType::System => "System",
        }
    }
}

/// Notification severity levels, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action expected.
    Low,
    /// Worth the recipient's attention.
    Medium,
    /// Urgent, action recommended.
    High,
    /// Life-safety relevance, delivered as loudly as the channel allows.
    Critical,
}

impl Severity {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

/// A delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Mobile push notification.
    Push,
    /// Email.
    Email,
    /// SMS text message.
    Sms,
}

impl Channel {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

/// One logical notification, rendered per channel at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// What kind of event this is. Drives preference filtering.
    pub notification_type: NotificationType,

    /// How urgent it is. Drives push sound/priority and the SMS prefix.
    pub severity: Severity,

    /// Short title (push title, email subject).
    pub title: String,

    /// Body text shared by all channels before per-channel rendering.
    pub body: String,

    /// Structured payload forwarded to the push client and flattened into
    /// the email template. Ordered so rendered output is deterministic.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,

    /// When the notification was created.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new notification with basic fields.
    pub fn new(
        notification_type: NotificationType,
        severity: Severity,
        title: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            notification_type,
            severity,
            title: title.to_string(),
            body: body.to_string(),
            data: BTreeMap::new(),
            created_at,
        }
    }

    /// Add a structured data entry.
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Whether this notification overrides recipient opt-outs.
    ///
    /// Only a **critical emergency** does. This is a deliberate
    /// life-safety policy: a tourist who muted check-in nags still gets
    /// told about an active emergency next to them.
    pub fn bypasses_preferences(&self) -> bool {
        self.notification_type == NotificationType::Emergency
            && self.severity == Severity::Critical
    }
}

/// A person notifications can be delivered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Stable user identifier.
    pub id: String,

    /// Display name, used in the email greeting when present.
    pub name: Option<String>,

    /// Email address, if the recipient registered one.
    pub email: Option<String>,

    /// Phone number in any human format; normalized at send time.
    pub phone_number: Option<String>,

    /// Push token from the mobile client, if registered.
    pub push_token: Option<String>,

    /// Per-type opt-outs. A type absent from the map is opted **in**.
    #[serde(default)]
    pub preferences: HashMap<NotificationType, bool>,
}

impl Recipient {
    /// Create a recipient with no contact details.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            email: None,
            phone_number: None,
            push_token: None,
            preferences: HashMap::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set the email address.
    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Set the phone number.
    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone_number = Some(phone.to_string());
        self
    }

    /// Set the push token.
    pub fn with_push_token(mut self, token: &str) -> Self {
        self.push_token = Some(token.to_string());
        self
    }

    /// Set an explicit preference for one notification type.
    pub fn with_preference(mut self, notification_type: NotificationType, enabled: bool) -> Self {
        self.preferences.insert(notification_type, enabled);
        self
    }

    /// Whether this recipient wants notifications of the given type.
    ///
    /// Defaults to `true` when no explicit preference was stored.
    pub fn wants(&self, notification_type: NotificationType) -> bool {
        self.preferences
            .get(&notification_type)
            .copied()
            .unwrap_or(true)
    }
}

/// Outcome of one channel attempt for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Which channel was attempted.
    pub channel: Channel,

    /// Whether the provider accepted the message.
    pub success: bool,

    /// Provider-assigned message id, when one was returned.
    pub provider_message_id: Option<String>,

    /// Error description for failed attempts.
    pub error: Option<String>,

    /// When the attempt completed.
    pub timestamp: DateTime<Utc>,
}

impl DispatchResult {
    /// Record a successful attempt.
    pub fn ok(channel: Channel, provider_message_id: Option<String>) -> Self {
        Self {
            channel,
            success: true,
            provider_message_id,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a failed attempt.
    pub fn err(channel: Channel, error: impl Into<String>) -> Self {
        Self {
            channel,
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Per-channel sent/failed counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub sent: usize,
    pub failed: usize,
}

/// Aggregate outcome of one dispatch invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Recipients the dispatch was asked to reach.
    pub total_users: usize,

    /// Recipients reached on at least one channel.
    pub successful: usize,

    /// Recipients attempted but reached on no channel, plus recipients
    /// with no usable channel at all.
    pub failed: usize,

    /// Recipients skipped by their own preferences. Not failures.
    pub filtered: usize,

    /// Attempt counters per channel label.
    pub by_channel: HashMap<String, ChannelCounts>,
}

impl DispatchSummary {
    /// Count a recipient skipped by the preference filter.
    pub fn record_filtered(&mut self) {
        self.filtered += 1;
    }

    /// Count a recipient none of the requested channels could reach.
    pub fn record_unreachable(&mut self) {
        self.failed += 1;
    }

    /// Fold one recipient's channel results into the summary.
    ///
    /// The recipient is successful when any result succeeded.
    pub fn record_results(&mut self, results: &[DispatchResult]) {
        if results.iter().any(|r| r.success) {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        for result in results {
            let counts = self
                .by_channel
                .entry(result.channel.label().to_string())
                .or_default();
            if result.success {
                counts.sent += 1;
            } else {
                counts.failed += 1;
            }
        }
    }
}

/// One archived dispatch for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistoryEntry {
    /// The notification as dispatched.
    pub notification: Notification,

    /// Every channel attempt made for this recipient.
    pub results: Vec<DispatchResult>,

    /// Who triggered the dispatch ("system" for automated sends).
    pub sender_id: String,

    /// When the entry was archived.
    pub timestamp: DateTime<Utc>,
}

impl NotificationHistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(notification: Notification, results: Vec<DispatchResult>, sender_id: &str) -> Self {
        Self {
            notification,
            results,
            sender_id: sender_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the recipient was reached on at least one channel.
    pub fn delivered(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }
}

/// Filter for history queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
    /// Only entries of this notification type.
    pub notification_type: Option<NotificationType>,

    /// Only entries archived at or after this instant.
    pub since: Option<DateTime<Utc>>,

    /// Maximum entries to return (newest first).
    pub limit: Option<usize>,
}

impl HistoryFilter {
    /// Whether an entry passes the type and time constraints.
    pub fn matches(&self, entry: &NotificationHistoryEntry) -> bool {
        if let Some(t) = self.notification_type
            && entry.notification.notification_type != t
        {
            return false;
        }
        if let Some(since) = self.since
            && entry.timestamp < since
        {
            return false;
        }
        true
    }
}

/// Delivery statistics over a recipient's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Total archived dispatches.
    pub total: usize,

    /// Dispatches that reached the recipient on some channel.
    pub delivered: usize,

    /// Dispatches that reached the recipient on no channel.
    pub failed: usize,

    /// Attempt counters per channel label.
    pub by_channel: HashMap<String, ChannelCounts>,
}

impl DeliveryStats {
    /// Compute statistics from a list of history entries.
    pub fn from_entries(entries: &[NotificationHistoryEntry]) -> Self {
        let mut by_channel: HashMap<String, ChannelCounts> = HashMap::new();
        let mut delivered = 0;
        let mut failed = 0;

        for entry in entries {
            if entry.delivered() {
                delivered += 1;
            } else {
                failed += 1;
            }

            for result in &entry.results {
                let counts = by_channel
                    .entry(result.channel.label().to_string())
                    .or_default();
                if result.success {
                    counts.sent += 1;
                } else {
                    counts.failed += 1;
                }
            }
        }

        Self {
            total: entries.len(),
            delivered,
            failed,
            by_channel,
        }
    }
}

/// One explainable contribution to a safety score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreFactor {
    /// Which signal produced this adjustment.
    pub name: String,

    /// Signed effect on the score. Zone blending reports the blend delta.
    pub impact: f64,

    /// Human-readable explanation of the adjustment.
    pub details: String,
}

/// A computed safety score with its full explanation.
///
/// Recomputed on demand, never cached: staleness decay means the same
/// inputs stop being the same inputs as time passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyScoreResult {
    /// Final score, clamped to [0, 100]. Higher is safer.
    pub score: f64,

    /// The neutral starting point before any factor applied.
    pub base_score: f64,

    /// Every signal that adjusted the score, in application order.
    pub factors: Vec<ScoreFactor>,

    /// Advice tier matching the final score.
    pub recommendations: Vec<String>,

    /// When the score was computed.
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_bypass_requires_critical_emergency() {
        let now = Utc::now();

        let critical_emergency =
            Notification::new(NotificationType::Emergency, Severity::Critical, "t", "b", now);
        assert!(critical_emergency.bypasses_preferences());

        // A critical weather alert still honors opt-outs
        let critical_weather =
            Notification::new(NotificationType::WeatherAlert, Severity::Critical, "t", "b", now);
        assert!(!critical_weather.bypasses_preferences());

        // A non-critical emergency does too
        let high_emergency =
            Notification::new(NotificationType::Emergency, Severity::High, "t", "b", now);
        assert!(!high_emergency.bypasses_preferences());
    }

    #[test]
    fn test_recipient_wants_defaults_to_true() {
        let recipient = Recipient::new("u1");
        assert!(recipient.wants(NotificationType::CheckIn));

        let opted_out = Recipient::new("u2").with_preference(NotificationType::CheckIn, false);
        assert!(!opted_out.wants(NotificationType::CheckIn));
        // Opting out of one type leaves the others enabled
        assert!(opted_out.wants(NotificationType::Emergency));
    }

    #[test]
    fn test_summary_or_reduction() {
        let mut summary = DispatchSummary::default();
        summary.total_users = 2;

        // Push failed but email landed: the recipient was reached
        summary.record_results(&[
            DispatchResult::err(Channel::Push, "token rejected"),
            DispatchResult::ok(Channel::Email, Some("msg-1".to_string())),
        ]);
        // Every channel failed
        summary.record_results(&[DispatchResult::err(Channel::Sms, "carrier error")]);

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_channel.get("push").map(|c| c.failed), Some(1));
        assert_eq!(summary.by_channel.get("email").map(|c| c.sent), Some(1));
        assert_eq!(summary.by_channel.get("sms").map(|c| c.failed), Some(1));
    }

    #[test]
    fn test_delivery_stats_from_entries() {
        let now = Utc::now();
        let notification =
            Notification::new(NotificationType::SafetyUpdate, Severity::Medium, "t", "b", now);

        let entries = vec![
            NotificationHistoryEntry::new(
                notification.clone(),
                vec![DispatchResult::ok(Channel::Push, None)],
                "system",
            ),
            NotificationHistoryEntry::new(
                notification.clone(),
                vec![
                    DispatchResult::err(Channel::Push, "timeout"),
                    DispatchResult::err(Channel::Email, "bounce"),
                ],
                "system",
            ),
        ];

        let stats = DeliveryStats::from_entries(&entries);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_channel.get("push").map(|c| c.failed), Some(1));
        assert_eq!(stats.by_channel.get("push").map(|c| c.sent), Some(1));
        assert_eq!(stats.by_channel.get("email").map(|c| c.failed), Some(1));
    }

    #[test]
    fn test_history_filter() {
        let now = Utc::now();
        let entry = NotificationHistoryEntry::new(
            Notification::new(NotificationType::Geofence, Severity::High, "t", "b", now),
            vec![DispatchResult::ok(Channel::Push, None)],
            "system",
        );

        let matching = HistoryFilter {
            notification_type: Some(NotificationType::Geofence),
            ..Default::default()
        };
        assert!(matching.matches(&entry));

        let wrong_type = HistoryFilter {
            notification_type: Some(NotificationType::CheckIn),
            ..Default::default()
        };
        assert!(!wrong_type.matches(&entry));

        let future_cutoff = HistoryFilter {
            since: Some(now + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!future_cutoff.matches(&entry));
    }
}

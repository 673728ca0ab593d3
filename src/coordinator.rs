//! Emergency lifecycle coordination.
//!
//! One reported emergency drives the whole response flow: the record and
//! its timeline, the tourist's tracking state, a safety score for the
//! scene, push alerts to tourists nearby, critical alerts to the
//! tourist's emergency contacts, and events to the operations dashboard.
//!
//! Alerting is best-effort by design: a failing collaborator downgrades
//! to a logged partial outcome, because an SOS must never bounce with a
//! 500 while the record sits unsaved. Only persistence of the record
//! itself is allowed to fail the operation.
//!
//! # Lifecycle
//!
//! `Active -> Responded -> Resolved`, forward-only. Skipping `Responded`
//! is legal; any mutation of a resolved emergency is rejected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::dispatch::NotificationDispatcher;
use crate::geo::{Coordinates, LocationStore, ProximityIndex};
use crate::model::{
    Channel, DispatchSummary, Notification, NotificationType, Recipient, SafetyScoreResult,
    Severity,
};
use crate::registry::RecipientDirectory;
use crate::scoring::SafetyScoreEngine;

/// Kinds of emergencies a tourist can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyType {
    Sos,
    Medical,
    Accident,
    Theft,
    Harassment,
    Other,
}

impl EmergencyType {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            EmergencyType::Sos => "SOS",
            EmergencyType::Medical => "Medical",
            EmergencyType::Accident => "Accident",
            EmergencyType::Theft => "Theft",
            EmergencyType::Harassment => "Harassment",
            EmergencyType::Other => "Other",
        }
    }
}

/// Lifecycle states of an emergency, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    /// Reported and awaiting response.
    Active,
    /// A responder has acknowledged and is acting.
    Responded,
    /// Closed. Terminal; no further mutation is accepted.
    Resolved,
}

impl EmergencyStatus {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            EmergencyStatus::Active => "active",
            EmergencyStatus::Responded => "responded",
            EmergencyStatus::Resolved => "resolved",
        }
    }

    /// Whether a record may move from this status to `next`.
    ///
    /// Transitions only move forward; skipping `Responded` is allowed.
    pub fn can_transition_to(&self, next: EmergencyStatus) -> bool {
        *self < next
    }
}

/// One append-only audit event on an emergency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// What happened ("reported", "responded", "note", ...).
    pub action: String,

    /// Free-text detail, when one was given.
    pub note: Option<String>,

    /// Who did it (tourist id, operator id, or "system").
    pub actor: String,

    /// When it happened.
    pub at: DateTime<Utc>,
}

/// One reported emergency and its full audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub id: Uuid,

    /// The tourist who reported it.
    pub tourist_id: String,

    pub emergency_type: EmergencyType,

    pub severity: Severity,

    pub status: EmergencyStatus,

    /// Where it was reported (or last updated to).
    pub location: Coordinates,

    /// Append-only audit trail.
    pub timeline: Vec<TimelineEntry>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl EmergencyRecord {
    /// Create a new active record with a fresh id.
    pub fn new(
        tourist_id: &str,
        emergency_type: EmergencyType,
        severity: Severity,
        location: Coordinates,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tourist_id: tourist_id.to_string(),
            emergency_type,
            severity,
            status: EmergencyStatus::Active,
            location,
            timeline: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Errors from emergency operations.
#[derive(Debug, Error)]
pub enum EmergencyError {
    #[error("emergency {0} not found")]
    NotFound(Uuid),

    #[error("cannot move emergency from {from:?} to {to:?}")]
    InvalidTransition {
        from: EmergencyStatus,
        to: EmergencyStatus,
    },

    #[error("emergency {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Persistence for emergency records.
#[async_trait]
pub trait EmergencyStore: Send + Sync {
    async fn insert(&self, record: &EmergencyRecord) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<EmergencyRecord>>;

    async fn update(&self, record: &EmergencyRecord) -> anyhow::Result<()>;
}

/// In-memory emergency store.
#[derive(Default)]
pub struct InMemoryEmergencyStore {
    records: RwLock<HashMap<Uuid, EmergencyRecord>>,
}

impl InMemoryEmergencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmergencyStore for InMemoryEmergencyStore {
    async fn insert(&self, record: &EmergencyRecord) -> anyhow::Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("emergency store lock poisoned"))?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<EmergencyRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("emergency store lock poisoned"))?;
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, record: &EmergencyRecord) -> anyhow::Result<()> {
        self.insert(record).await
    }
}

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How far around an emergency nearby tourists are alerted, meters.
    pub nearby_radius_meters: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            nearby_radius_meters: 5_000.0,
        }
    }
}

/// Everything one emergency operation produced.
#[derive(Debug, Serialize)]
pub struct EmergencyAlertOutcome {
    pub record: EmergencyRecord,

    /// Safety score of the scene at alert time.
    pub safety: SafetyScoreResult,

    /// Fan-out to tourists near the scene, when one ran.
    pub nearby_summary: Option<DispatchSummary>,

    /// Fan-out to the tourist's emergency contacts, when they have any.
    pub contact_summary: Option<DispatchSummary>,
}

/// Severity of the nearby-tourists alert for a given area score.
fn nearby_alert_severity(score: f64) -> Severity {
    if score < 30.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Orchestrates the response to reported emergencies.
#[derive(Clone)]
pub struct EmergencyCoordinator {
    store: Arc<dyn EmergencyStore>,
    directory: Arc<dyn RecipientDirectory>,
    locations: Arc<dyn LocationStore>,
    proximity: ProximityIndex,
    scoring: SafetyScoreEngine,
    dispatcher: NotificationDispatcher,
    broadcaster: Arc<dyn Broadcaster>,
    config: CoordinatorConfig,
}

impl EmergencyCoordinator {
    /// Create a new coordinator over the given collaborators.
    pub fn new(
        store: Arc<dyn EmergencyStore>,
        directory: Arc<dyn RecipientDirectory>,
        locations: Arc<dyn LocationStore>,
        scoring: SafetyScoreEngine,
        dispatcher: NotificationDispatcher,
        broadcaster: Arc<dyn Broadcaster>,
        config: CoordinatorConfig,
    ) -> Self {
        let proximity = ProximityIndex::new(locations.clone(), directory.clone());
        Self {
            store,
            directory,
            locations,
            proximity,
            scoring,
            dispatcher,
            broadcaster,
            config,
        }
    }

    /// Report a new emergency and run the full alert flow.
    ///
    /// Persists the record, raises the tourist's tracking emergency
    /// flag, scores the scene, alerts nearby tourists over push, alerts
    /// the tourist's emergency contacts over every channel, and pushes
    /// events to the dashboard. Alerting failures degrade to logged
    /// partial outcomes.
    pub async fn report(
        &self,
        tourist_id: &str,
        emergency_type: EmergencyType,
        severity: Severity,
        location: Coordinates,
        note: Option<String>,
    ) -> Result<EmergencyAlertOutcome, EmergencyError> {
        let now = Utc::now();

        let mut record = EmergencyRecord::new(tourist_id, emergency_type, severity, location, now);
        record.timeline.push(TimelineEntry {
            action: "reported".to_string(),
            note,
            actor: tourist_id.to_string(),
            at: now,
        });
        self.store.insert(&record).await?;

        info!(
            emergency_id = %record.id,
            tourist_id,
            emergency_type = emergency_type.label(),
            "emergency reported"
        );

        if let Err(e) = self.locations.mark_emergency(tourist_id, location, now).await {
            warn!(error = %e, tourist_id, "failed to update tracking state");
        }

        let safety = self.scoring.compute(Some(tourist_id), location, now).await;

        let nearby_summary = self.alert_nearby(&record, &safety).await;
        self.broadcast_record("emergency_alert", &record).await;
        let contact_summary = self.alert_contacts(&record, None).await;

        Ok(EmergencyAlertOutcome {
            record,
            safety,
            nearby_summary,
            contact_summary,
        })
    }

    /// Send a follow-up alert for an existing, unresolved emergency.
    ///
    /// Re-alerts the tourist's emergency contacts (optionally with a
    /// custom message and an updated location) and re-broadcasts to the
    /// dashboard. Rejected once the emergency is resolved.
    pub async fn send_alert(
        &self,
        emergency_id: Uuid,
        message: Option<&str>,
        location_override: Option<Coordinates>,
    ) -> Result<EmergencyAlertOutcome, EmergencyError> {
        let mut record = self.require(emergency_id).await?;
        if record.status == EmergencyStatus::Resolved {
            return Err(EmergencyError::AlreadyResolved(emergency_id));
        }

        let now = Utc::now();
        if let Some(location) = location_override {
            record.location = location;
            if let Err(e) = self
                .locations
                .mark_emergency(&record.tourist_id, location, now)
                .await
            {
                warn!(error = %e, tourist_id = %record.tourist_id, "failed to update tracking state");
            }
        }

        record.timeline.push(TimelineEntry {
            action: "alert_sent".to_string(),
            note: message.map(str::to_string),
            actor: "system".to_string(),
            at: now,
        });
        record.updated_at = now;
        self.store.update(&record).await?;

        let safety = self
            .scoring
            .compute(Some(&record.tourist_id), record.location, now)
            .await;
        let contact_summary = self.alert_contacts(&record, message).await;
        self.broadcast_record("emergency_alert", &record).await;

        Ok(EmergencyAlertOutcome {
            record,
            safety,
            nearby_summary: None,
            contact_summary,
        })
    }

    /// Move an emergency to a new lifecycle status.
    pub async fn update_status(
        &self,
        emergency_id: Uuid,
        new_status: EmergencyStatus,
        actor: &str,
        note: Option<String>,
    ) -> Result<EmergencyRecord, EmergencyError> {
        let mut record = self.require(emergency_id).await?;

        if record.status == EmergencyStatus::Resolved {
            return Err(EmergencyError::AlreadyResolved(emergency_id));
        }
        if !record.status.can_transition_to(new_status) {
            return Err(EmergencyError::InvalidTransition {
                from: record.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        record.status = new_status;
        record.timeline.push(TimelineEntry {
            action: new_status.label().to_string(),
            note,
            actor: actor.to_string(),
            at: now,
        });
        record.updated_at = now;

        if new_status == EmergencyStatus::Resolved
            && let Err(e) = self.locations.clear_emergency(&record.tourist_id).await
        {
            warn!(error = %e, tourist_id = %record.tourist_id, "failed to clear tracking emergency flag");
        }

        self.store.update(&record).await?;
        self.broadcast_record("emergency_status", &record).await;

        info!(
            emergency_id = %record.id,
            status = new_status.label(),
            actor,
            "emergency status updated"
        );
        Ok(record)
    }

    /// Append a free-text note to an unresolved emergency's timeline.
    pub async fn add_note(
        &self,
        emergency_id: Uuid,
        note: &str,
        actor: &str,
    ) -> Result<EmergencyRecord, EmergencyError> {
        let mut record = self.require(emergency_id).await?;
        if record.status == EmergencyStatus::Resolved {
            return Err(EmergencyError::AlreadyResolved(emergency_id));
        }

        let now = Utc::now();
        record.timeline.push(TimelineEntry {
            action: "note".to_string(),
            note: Some(note.to_string()),
            actor: actor.to_string(),
            at: now,
        });
        record.updated_at = now;
        self.store.update(&record).await?;
        Ok(record)
    }

    /// Fetch one emergency.
    pub async fn get(&self, emergency_id: Uuid) -> Result<EmergencyRecord, EmergencyError> {
        self.require(emergency_id).await
    }

    async fn require(&self, id: Uuid) -> Result<EmergencyRecord, EmergencyError> {
        self.store
            .get(id)
            .await?
            .ok_or(EmergencyError::NotFound(id))
    }

    /// Push-alert tourists near the scene, excluding the reporter.
    async fn alert_nearby(
        &self,
        record: &EmergencyRecord,
        safety: &SafetyScoreResult,
    ) -> Option<DispatchSummary> {
        // Live connections near the scene hear about it regardless of
        // whether push can reach them
        let payload = json!({
            "emergencyId": record.id,
            "emergencyType": record.emergency_type,
            "location": record.location,
            "areaScore": safety.score,
        });
        if let Err(e) = self
            .broadcaster
            .broadcast_to_nearby(
                record.location,
                self.config.nearby_radius_meters,
                "emergency_nearby",
                payload,
            )
            .await
        {
            warn!(error = %e, emergency_id = %record.id, "nearby broadcast failed");
        }

        let nearby = match self
            .proximity
            .find_near(record.location, self.config.nearby_radius_meters)
            .await
        {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(error = %e, emergency_id = %record.id, "proximity lookup failed, skipping nearby alerts");
                return None;
            }
        };

        let recipients: Vec<Recipient> = nearby
            .into_iter()
            .filter(|r| r.id != record.tourist_id)
            .collect();
        if recipients.is_empty() {
            debug!(emergency_id = %record.id, "no tourists near the scene");
            return None;
        }

        let notification = Notification::new(
            NotificationType::Emergency,
            nearby_alert_severity(safety.score),
            "Emergency reported nearby",
            "An emergency was reported near your location. Stay alert and avoid the area if possible.",
            Utc::now(),
        )
        .with_data("emergencyId", json!(record.id))
        .with_data("emergencyType", json!(record.emergency_type))
        .with_data("areaScore", json!(safety.score))
        .with_data("recommendations", json!(safety.recommendations));

        match self
            .dispatcher
            .dispatch(&notification, &recipients, &[Channel::Push], "system")
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, emergency_id = %record.id, "nearby dispatch rejected");
                None
            }
        }
    }

    /// Alert the tourist's emergency contacts on every channel.
    ///
    /// Always critical: this is the life-safety path, and it intentionally
    /// overrides contact opt-outs.
    async fn alert_contacts(
        &self,
        record: &EmergencyRecord,
        message: Option<&str>,
    ) -> Option<DispatchSummary> {
        let contacts = match self.directory.emergency_contacts(&record.tourist_id).await {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(error = %e, tourist_id = %record.tourist_id, "emergency contact lookup failed");
                return None;
            }
        };
        if contacts.is_empty() {
            debug!(tourist_id = %record.tourist_id, "no emergency contacts registered");
            return None;
        }

        let reporter_name = match self.directory.get(&record.tourist_id).await {
            Ok(Some(profile)) => profile.name.unwrap_or_else(|| record.tourist_id.clone()),
            _ => record.tourist_id.clone(),
        };

        let body = match message {
            Some(message) => message.to_string(),
            None => format!(
                "{} reported a {} emergency and may need your help. Their last known location is attached.",
                reporter_name,
                record.emergency_type.label().to_lowercase()
            ),
        };

        let notification = Notification::new(
            NotificationType::Emergency,
            Severity::Critical,
            "Emergency alert",
            &body,
            Utc::now(),
        )
        .with_data("emergencyId", json!(record.id))
        .with_data("touristId", json!(record.tourist_id))
        .with_data("longitude", json!(record.location.longitude))
        .with_data("latitude", json!(record.location.latitude));

        match self
            .dispatcher
            .dispatch(
                &notification,
                &contacts,
                &[Channel::Push, Channel::Email, Channel::Sms],
                "system",
            )
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, emergency_id = %record.id, "contact dispatch rejected");
                None
            }
        }
    }

    async fn broadcast_record(&self, event: &str, record: &EmergencyRecord) {
        match serde_json::to_value(record) {
            Ok(payload) => {
                if let Err(e) = self.broadcaster.broadcast_to_dashboard(event, payload).await {
                    warn!(error = %e, event, "dashboard broadcast failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize emergency record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::push::is_expo_push_token;
    use crate::channels::{
        ChannelError, EmailMessage, EmailTransport, PushMessage, PushProvider, PushTicket,
        SmsMessage, SmsProvider,
    };
    use crate::dispatch::DispatcherConfig;
    use crate::geo::{InMemoryLocationStore, StaticGeofenceIndex};
    use crate::history::{HistoryStore, InMemoryHistoryStore};
    use crate::model::HistoryFilter;
    use crate::registry::InMemoryRecipientDirectory;
    use std::sync::Mutex;

    const SCENE: Coordinates = Coordinates {
        longitude: 100.5018,
        latitude: 13.7563,
    };

    struct OkPush;

    #[async_trait]
    impl PushProvider for OkPush {
        fn is_valid_token(&self, token: &str) -> bool {
            is_expo_push_token(token)
        }

        async fn send_chunk(
            &self,
            messages: Vec<PushMessage>,
        ) -> Result<Vec<PushTicket>, ChannelError> {
            Ok(messages
                .iter()
                .map(|_| PushTicket {
                    status: "ok".to_string(),
                    id: Some("t".to_string()),
                    message: None,
                })
                .collect())
        }
    }

    struct OkEmail;

    #[async_trait]
    impl EmailTransport for OkEmail {
        async fn send(&self, _message: EmailMessage) -> Result<String, ChannelError> {
            Ok("mail-1".to_string())
        }
    }

    struct OkSms;

    #[async_trait]
    impl SmsProvider for OkSms {
        async fn send(&self, _message: SmsMessage) -> Result<String, ChannelError> {
            Ok("SM1".to_string())
        }
    }

    struct RecordingBroadcaster {
        events: Mutex<Vec<String>>,
    }

    impl RecordingBroadcaster {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast_to_dashboard(
            &self,
            event: &str,
            _payload: serde_json::Value,
        ) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.to_string());
            Ok(())
        }

        async fn broadcast_to_nearby(
            &self,
            _center: Coordinates,
            _radius_meters: f64,
            event: &str,
            _payload: serde_json::Value,
        ) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("nearby:{event}"));
            Ok(())
        }

        async fn emit_to(
            &self,
            _connection_id: &str,
            event: &str,
            _payload: serde_json::Value,
        ) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("direct:{event}"));
            Ok(())
        }
    }

    struct World {
        coordinator: EmergencyCoordinator,
        directory: Arc<InMemoryRecipientDirectory>,
        locations: Arc<InMemoryLocationStore>,
        history: Arc<InMemoryHistoryStore>,
        broadcaster: Arc<RecordingBroadcaster>,
    }

    fn world() -> World {
        let directory = Arc::new(InMemoryRecipientDirectory::new());
        let locations = Arc::new(InMemoryLocationStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());

        let scoring = SafetyScoreEngine::new(
            Arc::new(StaticGeofenceIndex::new()),
            locations.clone(),
        );
        let dispatcher = NotificationDispatcher::new(
            Arc::new(OkPush),
            Arc::new(OkEmail),
            Arc::new(OkSms),
            history.clone(),
            DispatcherConfig::default(),
        );
        let coordinator = EmergencyCoordinator::new(
            Arc::new(InMemoryEmergencyStore::new()),
            directory.clone(),
            locations.clone(),
            scoring,
            dispatcher,
            broadcaster.clone(),
            CoordinatorConfig::default(),
        );

        World {
            coordinator,
            directory,
            locations,
            history,
            broadcaster,
        }
    }

    #[tokio::test]
    async fn test_report_creates_active_record_with_timeline() {
        let w = world();

        let outcome = w
            .coordinator
            .report(
                "t1",
                EmergencyType::Sos,
                Severity::Critical,
                SCENE,
                Some("help".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.record.status, EmergencyStatus::Active);
        assert_eq!(outcome.record.timeline.len(), 1);
        assert_eq!(outcome.record.timeline[0].action, "reported");
        assert_eq!(outcome.record.timeline[0].note.as_deref(), Some("help"));

        // The record is retrievable and tracking shows the emergency
        let fetched = w.coordinator.get(outcome.record.id).await.unwrap();
        assert_eq!(fetched.id, outcome.record.id);
        let sample = w.locations.latest_location("t1").await.unwrap().unwrap();
        assert!(sample.emergency);
    }

    #[tokio::test]
    async fn test_report_alerts_nearby_excluding_reporter() {
        let w = world();
        let now = Utc::now();

        // Reporter, one tourist 1.1 km away, one tourist far away
        for (id, longitude) in [("t1", 100.5018), ("near", 100.5118), ("far", 101.6)] {
            w.directory
                .upsert(Recipient::new(id).with_push_token(&format!("ExponentPushToken[{id}]")))
                .await
                .unwrap();
            w.locations
                .record_location(id, Coordinates::new(longitude, 13.7563), now)
                .await
                .unwrap();
        }

        let outcome = w
            .coordinator
            .report("t1", EmergencyType::Medical, Severity::High, SCENE, None)
            .await
            .unwrap();

        let nearby = outcome.nearby_summary.unwrap();
        assert_eq!(nearby.total_users, 1);
        assert_eq!(nearby.successful, 1);

        // Only the nearby tourist was alerted
        let near_entries = w.history.recent("near", &HistoryFilter::default()).await.unwrap();
        assert_eq!(near_entries.len(), 1);
        assert!(
            w.history
                .recent("t1", &HistoryFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            w.history
                .recent("far", &HistoryFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_report_alerts_contacts_despite_opt_out() {
        let w = world();

        w.directory
            .upsert(Recipient::new("t1").with_name("Ana"))
            .await
            .unwrap();
        // The contact muted emergencies; the critical contact alert
        // overrides that
        w.directory
            .upsert(
                Recipient::new("mom")
                    .with_email("mom@example.com")
                    .with_phone("+1 555 0100")
                    .with_preference(NotificationType::Emergency, false),
            )
            .await
            .unwrap();
        w.directory
            .set_emergency_contacts("t1", vec!["mom".to_string()])
            .await
            .unwrap();

        let outcome = w
            .coordinator
            .report("t1", EmergencyType::Sos, Severity::Critical, SCENE, None)
            .await
            .unwrap();

        let contact_summary = outcome.contact_summary.unwrap();
        assert_eq!(contact_summary.total_users, 1);
        assert_eq!(contact_summary.filtered, 0);
        assert_eq!(contact_summary.successful, 1);

        let entries = w.history.recent("mom", &HistoryFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].notification.severity, Severity::Critical);
        assert!(entries[0].notification.body.contains("Ana"));
    }

    #[tokio::test]
    async fn test_status_moves_forward_only() {
        let w = world();
        let id = w
            .coordinator
            .report("t1", EmergencyType::Theft, Severity::Medium, SCENE, None)
            .await
            .unwrap()
            .record
            .id;

        let responded = w
            .coordinator
            .update_status(id, EmergencyStatus::Responded, "operator-7", None)
            .await
            .unwrap();
        assert_eq!(responded.status, EmergencyStatus::Responded);

        // Backward is rejected
        let backward = w
            .coordinator
            .update_status(id, EmergencyStatus::Active, "operator-7", None)
            .await;
        assert!(matches!(
            backward,
            Err(EmergencyError::InvalidTransition { .. })
        ));

        let resolved = w
            .coordinator
            .update_status(id, EmergencyStatus::Resolved, "operator-7", None)
            .await
            .unwrap();
        assert_eq!(resolved.status, EmergencyStatus::Resolved);
        assert_eq!(
            resolved.timeline.last().map(|t| t.action.as_str()),
            Some("resolved")
        );

        // Resolved is terminal
        let again = w
            .coordinator
            .update_status(id, EmergencyStatus::Resolved, "operator-7", None)
            .await;
        assert!(matches!(again, Err(EmergencyError::AlreadyResolved(_))));
    }

    #[tokio::test]
    async fn test_active_may_jump_straight_to_resolved() {
        let w = world();
        let id = w
            .coordinator
            .report("t1", EmergencyType::Other, Severity::Low, SCENE, None)
            .await
            .unwrap()
            .record
            .id;

        let resolved = w
            .coordinator
            .update_status(id, EmergencyStatus::Resolved, "operator-1", None)
            .await
            .unwrap();
        assert_eq!(resolved.status, EmergencyStatus::Resolved);
    }

    #[tokio::test]
    async fn test_resolved_rejects_alerts_and_notes() {
        let w = world();
        let id = w
            .coordinator
            .report("t1", EmergencyType::Sos, Severity::Critical, SCENE, None)
            .await
            .unwrap()
            .record
            .id;
        w.coordinator
            .update_status(id, EmergencyStatus::Resolved, "operator-1", None)
            .await
            .unwrap();

        assert!(matches!(
            w.coordinator.send_alert(id, Some("still there?"), None).await,
            Err(EmergencyError::AlreadyResolved(_))
        ));
        assert!(matches!(
            w.coordinator.add_note(id, "late note", "operator-1").await,
            Err(EmergencyError::AlreadyResolved(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_clears_tracking_flag() {
        let w = world();
        let id = w
            .coordinator
            .report("t1", EmergencyType::Sos, Severity::Critical, SCENE, None)
            .await
            .unwrap()
            .record
            .id;
        assert!(w.locations.latest_location("t1").await.unwrap().unwrap().emergency);

        w.coordinator
            .update_status(id, EmergencyStatus::Resolved, "operator-1", None)
            .await
            .unwrap();

        assert!(!w.locations.latest_location("t1").await.unwrap().unwrap().emergency);
    }

    #[tokio::test]
    async fn test_send_alert_uses_custom_message() {
        let w = world();
        w.directory
            .upsert(Recipient::new("mom").with_email("mom@example.com"))
            .await
            .unwrap();
        w.directory
            .set_emergency_contacts("t1", vec!["mom".to_string()])
            .await
            .unwrap();

        let id = w
            .coordinator
            .report("t1", EmergencyType::Sos, Severity::Critical, SCENE, None)
            .await
            .unwrap()
            .record
            .id;

        let outcome = w
            .coordinator
            .send_alert(id, Some("Moved to the station, please call"), None)
            .await
            .unwrap();

        assert_eq!(
            outcome.record.timeline.last().map(|t| t.action.as_str()),
            Some("alert_sent")
        );

        let entries = w.history.recent("mom", &HistoryFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].notification.body,
            "Moved to the station, please call"
        );
    }

    #[tokio::test]
    async fn test_missing_emergency_is_not_found() {
        let w = world();
        let missing = Uuid::new_v4();

        assert!(matches!(
            w.coordinator.get(missing).await,
            Err(EmergencyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dashboard_hears_about_lifecycle() {
        let w = world();
        let id = w
            .coordinator
            .report("t1", EmergencyType::Sos, Severity::Critical, SCENE, None)
            .await
            .unwrap()
            .record
            .id;
        w.coordinator
            .update_status(id, EmergencyStatus::Responded, "operator-1", None)
            .await
            .unwrap();

        let events = w.broadcaster.events.lock().unwrap().clone();
        assert!(events.contains(&"emergency_alert".to_string()));
        assert!(events.contains(&"nearby:emergency_nearby".to_string()));
        assert!(events.contains(&"emergency_status".to_string()));
    }

    #[test]
    fn test_nearby_alert_severity_threshold() {
        assert_eq!(nearby_alert_severity(15.0), Severity::High);
        assert_eq!(nearby_alert_severity(29.9), Severity::High);
        assert_eq!(nearby_alert_severity(30.0), Severity::Medium);
        assert_eq!(nearby_alert_severity(75.0), Severity::Medium);
    }
}

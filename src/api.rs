//! HTTP API handlers for Beacon.
//!
//! Thin translation layer: handlers validate and decode requests, call
//! one engine, and map its result onto a status code. All domain rules
//! (preference filtering, the critical-emergency bypass, the lifecycle
//! state machine) live in the engines, never here.
//!
//! A partially failed fan-out is still a 2xx with the summary in the
//! body; error statuses are reserved for requests that could not be
//! accepted at all.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::channels::push::is_expo_push_token;
use crate::coordinator::{
    EmergencyAlertOutcome, EmergencyCoordinator, EmergencyError, EmergencyRecord, EmergencyStatus,
    EmergencyType,
};
use crate::dispatch::{DispatchError, NotificationDispatcher};
use crate::geo::{Coordinates, GeofenceZone, LocationStore, SafetyLevel};
use crate::history::HistoryStore;
use crate::model::{
    Channel, DeliveryStats, DispatchSummary, HistoryFilter, Notification,
    NotificationHistoryEntry, NotificationType, SafetyScoreResult, Severity,
};
use crate::registry::RecipientDirectory;
use crate::scoring::SafetyScoreEngine;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: NotificationDispatcher,
    pub coordinator: EmergencyCoordinator,
    pub directory: Arc<dyn RecipientDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub locations: Arc<dyn LocationStore>,
    pub scoring: SafetyScoreEngine,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Build the full route table over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notifications", post(post_notification))
        .route("/emergencies", post(post_emergency))
        .route("/emergencies/:id", get(get_emergency))
        .route("/emergencies/:id/alert", post(post_emergency_alert))
        .route("/emergencies/:id/status", patch(patch_emergency_status))
        .route("/geofence-alerts", post(post_geofence_alert))
        .route("/history/:user_id", get(get_history))
        .route("/history/:user_id/stats", get(get_history_stats))
        .route("/preferences/:user_id", put(put_preferences))
        .route("/push-tokens/:user_id", post(post_push_token))
        .route("/locations/:tourist_id", post(post_location))
        .route("/safety-score", get(get_safety_score))
        .route("/health", get(health_check))
        .with_state(state)
}

fn emergency_status_code(e: &EmergencyError) -> StatusCode {
    match e {
        EmergencyError::NotFound(_) => StatusCode::NOT_FOUND,
        EmergencyError::InvalidTransition { .. } | EmergencyError::AlreadyResolved(_) => {
            StatusCode::CONFLICT
        }
        EmergencyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn default_notification_type() -> NotificationType {
    NotificationType::System
}

fn default_severity() -> Severity {
    Severity::Medium
}

fn default_emergency_severity() -> Severity {
    Severity::Critical
}

/// Request body for `POST /notifications`.
#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: NotificationType,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub recipient_ids: Vec<String>,
    /// Channels to attempt; defaults to push only.
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub sender_id: Option<String>,
}

/// POST /notifications - Dispatch a notification to a set of recipients.
///
/// # Request Body
///
/// ```json
/// {
///     "title": "Weather warning",
///     "body": "Heavy rain expected tonight.",
///     "notification_type": "weatherAlert",
///     "severity": "medium",
///     "recipient_ids": ["t1", "t2"],
///     "channels": ["push", "email"]
/// }
/// ```
///
/// # Response
///
/// Returns the dispatch summary. Per-recipient channel failures are part
/// of the summary, not an error status.
#[instrument(skip(state, request))]
pub async fn post_notification(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<DispatchSummary>, StatusCode> {
    if request.title.trim().is_empty() || request.body.trim().is_empty() {
        warn!("Rejected notification with blank title or body");
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.recipient_ids.is_empty() {
        warn!("Rejected notification with no recipients");
        return Err(StatusCode::BAD_REQUEST);
    }

    let recipients = match state.directory.resolve(&request.recipient_ids).await {
        Ok(recipients) => recipients,
        Err(e) => {
            warn!(error = %e, "Failed to resolve recipients");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut notification = Notification::new(
        request.notification_type,
        request.severity,
        &request.title,
        &request.body,
        Utc::now(),
    );
    notification.data = request.data;

    let channels = request.channels.unwrap_or_else(|| vec![Channel::Push]);
    let sender_id = request.sender_id.as_deref().unwrap_or("system");

    match state
        .dispatcher
        .dispatch(&notification, &recipients, &channels, sender_id)
        .await
    {
        Ok(summary) => {
            info!(
                total = summary.total_users,
                successful = summary.successful,
                failed = summary.failed,
                filtered = summary.filtered,
                "Notification dispatched"
            );
            Ok(Json(summary))
        }
        Err(DispatchError::Validation(reason)) => {
            warn!(reason = %reason, "Rejected invalid notification");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Request body for `POST /emergencies`.
#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub tourist_id: String,
    pub emergency_type: EmergencyType,
    /// Defaults to critical; an SOS without a stated severity is treated
    /// as life-threatening.
    #[serde(default = "default_emergency_severity")]
    pub severity: Severity,
    pub location: Coordinates,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /emergencies - Report an emergency and run the full alert flow.
///
/// # Request Body
///
/// ```json
/// {
///     "tourist_id": "t1",
///     "emergency_type": "sos",
///     "location": { "longitude": 100.5018, "latitude": 13.7563 },
///     "note": "Lost near the river"
/// }
/// ```
///
/// # Response
///
/// Returns `201 Created` with the record, the scene safety score, and
/// the contact/nearby dispatch summaries.
#[instrument(skip(state, request))]
pub async fn post_emergency(
    State(state): State<AppState>,
    Json(request): Json<EmergencyRequest>,
) -> Result<(StatusCode, Json<EmergencyAlertOutcome>), StatusCode> {
    if request.tourist_id.trim().is_empty() {
        warn!("Rejected emergency report without a tourist id");
        return Err(StatusCode::BAD_REQUEST);
    }

    match state
        .coordinator
        .report(
            &request.tourist_id,
            request.emergency_type,
            request.severity,
            request.location,
            request.note,
        )
        .await
    {
        Ok(outcome) => {
            info!(
                emergency_id = %outcome.record.id,
                tourist_id = %request.tourist_id,
                "Emergency reported"
            );
            Ok((StatusCode::CREATED, Json(outcome)))
        }
        Err(e) => {
            warn!(tourist_id = %request.tourist_id, error = %e, "Failed to report emergency");
            Err(emergency_status_code(&e))
        }
    }
}

/// GET /emergencies/:id - Fetch one emergency record.
#[instrument(skip(state))]
pub async fn get_emergency(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmergencyRecord>, StatusCode> {
    match state.coordinator.get(id).await {
        Ok(record) => Ok(Json(record)),
        Err(e) => {
            warn!(emergency_id = %id, error = %e, "Failed to fetch emergency");
            Err(emergency_status_code(&e))
        }
    }
}

/// Request body for `POST /emergencies/:id/alert`.
#[derive(Debug, Deserialize)]
pub struct EmergencyAlertRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

/// POST /emergencies/:id/alert - Send a follow-up alert to the tourist's
/// emergency contacts.
///
/// Rejected with `409 Conflict` once the emergency is resolved.
#[instrument(skip(state, request))]
pub async fn post_emergency_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EmergencyAlertRequest>,
) -> Result<Json<EmergencyAlertOutcome>, StatusCode> {
    match state
        .coordinator
        .send_alert(id, request.message.as_deref(), request.location)
        .await
    {
        Ok(outcome) => {
            info!(emergency_id = %id, "Emergency alert sent");
            Ok(Json(outcome))
        }
        Err(e) => {
            warn!(emergency_id = %id, error = %e, "Failed to send emergency alert");
            Err(emergency_status_code(&e))
        }
    }
}

/// Request body for `PATCH /emergencies/:id/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: EmergencyStatus,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// PATCH /emergencies/:id/status - Move an emergency through its
/// lifecycle.
///
/// Transitions only move forward; an invalid transition or a mutation of
/// a resolved emergency returns `409 Conflict`.
#[instrument(skip(state, request))]
pub async fn patch_emergency_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<EmergencyRecord>, StatusCode> {
    let actor = request.actor.as_deref().unwrap_or("operator");

    match state
        .coordinator
        .update_status(id, request.status, actor, request.note)
        .await
    {
        Ok(record) => {
            info!(
                emergency_id = %id,
                status = record.status.label(),
                "Emergency status updated"
            );
            Ok(Json(record))
        }
        Err(e) => {
            warn!(emergency_id = %id, error = %e, "Failed to update emergency status");
            Err(emergency_status_code(&e))
        }
    }
}

/// Whether the tourist entered or left the zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceAction {
    Entered,
    Exited,
}

/// Request body for `POST /geofence-alerts`.
#[derive(Debug, Deserialize)]
pub struct GeofenceAlertRequest {
    pub tourist_id: String,
    pub zone: GeofenceZone,
    pub action: GeofenceAction,
    pub coordinates: Coordinates,
}

/// POST /geofence-alerts - Notify a tourist about a zone boundary
/// crossing.
///
/// Alert severity follows the zone's safety classification when
/// entering; leaving a zone is always informational. The crossing is
/// also broadcast to the operations dashboard.
#[instrument(skip(state, request))]
pub async fn post_geofence_alert(
    State(state): State<AppState>,
    Json(request): Json<GeofenceAlertRequest>,
) -> Result<Json<DispatchSummary>, StatusCode> {
    let recipient = match state.directory.get(&request.tourist_id).await {
        Ok(Some(recipient)) => recipient,
        Ok(None) => {
            warn!(tourist_id = %request.tourist_id, "Unknown tourist for geofence alert");
            return Err(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            warn!(tourist_id = %request.tourist_id, error = %e, "Failed to look up tourist");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let (severity, title, body) = match request.action {
        GeofenceAction::Entered => {
            let caution = match request.zone.safety_level {
                SafetyLevel::Dangerous | SafetyLevel::Unsafe => {
                    " Stay alert and consider a safer route."
                }
                _ => "",
            };
            (
                request.zone.safety_level.alert_severity(),
                format!("Entering {}", request.zone.name),
                format!(
                    "You are entering {}, an area classified as {}.{}",
                    request.zone.name,
                    request.zone.safety_level.label(),
                    caution
                ),
            )
        }
        GeofenceAction::Exited => (
            Severity::Low,
            format!("Leaving {}", request.zone.name),
            format!("You have left {}.", request.zone.name),
        ),
    };

    let notification = Notification::new(
        NotificationType::Geofence,
        severity,
        &title,
        &body,
        Utc::now(),
    )
    .with_data("zone", json!(request.zone))
    .with_data("action", json!(request.action))
    .with_data("longitude", json!(request.coordinates.longitude))
    .with_data("latitude", json!(request.coordinates.latitude));

    let recipients = vec![recipient];
    match state
        .dispatcher
        .dispatch(&notification, &recipients, &[Channel::Push], "system")
        .await
    {
        Ok(summary) => {
            let payload = json!({
                "touristId": request.tourist_id,
                "zone": request.zone,
                "action": request.action,
                "coordinates": request.coordinates,
            });
            if let Err(e) = state
                .broadcaster
                .broadcast_to_dashboard("geofence_alert", payload)
                .await
            {
                warn!(error = %e, "Dashboard broadcast failed");
            }

            info!(
                tourist_id = %request.tourist_id,
                zone = %request.zone.name,
                "Geofence alert dispatched"
            );
            Ok(Json(summary))
        }
        Err(DispatchError::Validation(reason)) => {
            warn!(reason = %reason, "Rejected geofence alert");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Query parameters for the history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Filter by notification type.
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    /// Only entries archived at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Maximum entries to return.
    pub limit: Option<usize>,
}

/// GET /history/:user_id - Archived dispatch outcomes, newest first.
///
/// # Query Parameters
///
/// - `type` (optional): Filter by notification type (`"emergency"`, ...)
/// - `since` (optional): RFC 3339 lower bound on the archive time
/// - `limit` (optional): Maximum entries to return
#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<NotificationHistoryEntry>>, StatusCode> {
    let filter = HistoryFilter {
        notification_type: query.notification_type,
        since: query.since,
        limit: query.limit,
    };

    match state.history.recent(&user_id, &filter).await {
        Ok(entries) => {
            info!(user_id = %user_id, count = entries.len(), "History queried");
            Ok(Json(entries))
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to query history");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /history/:user_id/stats - Delivery statistics over the archive.
#[instrument(skip(state))]
pub async fn get_history_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeliveryStats>, StatusCode> {
    match state.history.stats(&user_id).await {
        Ok(stats) => {
            info!(
                user_id = %user_id,
                total = stats.total,
                delivered = stats.delivered,
                "History stats queried"
            );
            Ok(Json(stats))
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to compute history stats");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Request body for `PUT /preferences/:user_id`.
#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub preferences: HashMap<NotificationType, bool>,
}

/// PUT /preferences/:user_id - Replace a recipient's notification
/// preferences.
///
/// Types absent from the map stay opted in. Critical emergency alerts
/// ignore these preferences by policy.
#[instrument(skip(state, request))]
pub async fn put_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PreferencesRequest>,
) -> impl IntoResponse {
    match state
        .directory
        .set_preferences(&user_id, request.preferences)
        .await
    {
        Ok(()) => {
            info!(user_id = %user_id, "Preferences updated");
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to update preferences");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Request body for `POST /push-tokens/:user_id`.
#[derive(Debug, Deserialize)]
pub struct PushTokenRequest {
    pub token: String,
}

/// POST /push-tokens/:user_id - Register a mobile push token.
///
/// Tokens that do not look like Expo push tokens are rejected with
/// `400 Bad Request` so the client learns immediately instead of at the
/// first silent delivery failure.
#[instrument(skip(state, request))]
pub async fn post_push_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PushTokenRequest>,
) -> impl IntoResponse {
    if !is_expo_push_token(&request.token) {
        warn!(user_id = %user_id, "Rejected malformed push token");
        return StatusCode::BAD_REQUEST;
    }

    match state.directory.set_push_token(&user_id, &request.token).await {
        Ok(()) => {
            info!(user_id = %user_id, "Push token registered");
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to register push token");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Request body for `POST /locations/:tourist_id`.
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub longitude: f64,
    pub latitude: f64,
}

/// POST /locations/:tourist_id - Record a location heartbeat.
///
/// Feeds the tracking store behind proximity targeting and the safety
/// score's recency factor. Returns `202 Accepted`.
#[instrument(skip(state, request))]
pub async fn post_location(
    State(state): State<AppState>,
    Path(tourist_id): Path<String>,
    Json(request): Json<LocationRequest>,
) -> impl IntoResponse {
    if !(-180.0..=180.0).contains(&request.longitude)
        || !(-90.0..=90.0).contains(&request.latitude)
    {
        warn!(tourist_id = %tourist_id, "Rejected out-of-range coordinates");
        return StatusCode::BAD_REQUEST;
    }

    let coordinates = Coordinates::new(request.longitude, request.latitude);
    match state
        .locations
        .record_location(&tourist_id, coordinates, Utc::now())
        .await
    {
        Ok(()) => {
            info!(tourist_id = %tourist_id, "Location recorded");
            StatusCode::ACCEPTED
        }
        Err(e) => {
            warn!(tourist_id = %tourist_id, error = %e, "Failed to record location");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Query parameters for the safety score endpoint.
#[derive(Debug, Deserialize)]
pub struct SafetyScoreQuery {
    pub tourist_id: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

/// Safety score response with the scored position echoed back.
#[derive(Debug, Serialize)]
pub struct SafetyScoreResponse {
    pub tourist_id: Option<String>,
    pub coordinates: Coordinates,
    #[serde(flatten)]
    pub result: SafetyScoreResult,
}

/// GET /safety-score - Compute the safety score for a position.
///
/// # Query Parameters
///
/// - `tourist_id` (optional): Enables the recency factor and the
///   last-known-location fallback
/// - `longitude` / `latitude` (optional): Score an explicit position
///
/// Explicit coordinates win; otherwise the tourist's last-known location
/// is scored. `404 Not Found` when the tourist has no known location.
///
/// # Response
///
/// ```json
/// {
///     "tourist_id": "t1",
///     "coordinates": { "longitude": 100.5018, "latitude": 13.7563 },
///     "score": 77.5,
///     "base_score": 70.0,
///     "factors": [ { "name": "time of day", "impact": 10.0, "details": "daytime" } ],
///     "recommendations": ["Follow standard safety practices"],
///     "computed_at": "2024-06-15T12:00:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn get_safety_score(
    State(state): State<AppState>,
    Query(query): Query<SafetyScoreQuery>,
) -> Result<Json<SafetyScoreResponse>, StatusCode> {
    let coordinates = match (query.longitude, query.latitude) {
        (Some(longitude), Some(latitude)) => Coordinates::new(longitude, latitude),
        _ => {
            let Some(tourist_id) = query.tourist_id.as_deref() else {
                warn!("Safety score query without coordinates or tourist id");
                return Err(StatusCode::BAD_REQUEST);
            };
            match state.locations.latest_location(tourist_id).await {
                Ok(Some(sample)) => sample.coordinates,
                Ok(None) => {
                    warn!(tourist_id, "No known location to score");
                    return Err(StatusCode::NOT_FOUND);
                }
                Err(e) => {
                    warn!(tourist_id, error = %e, "Failed to look up location");
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }
    };

    let result = state
        .scoring
        .compute(query.tourist_id.as_deref(), coordinates, Utc::now())
        .await;

    info!(
        score = result.score,
        factors = result.factors.len(),
        "Safety score computed"
    );
    Ok(Json(SafetyScoreResponse {
        tourist_id: query.tourist_id,
        coordinates,
        result,
    }))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

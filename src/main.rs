//! Beacon - location-aware safety scoring and emergency alert fan-out.
//!
//! # Overview
//!
//! Beacon watches over travelers. It scores how safe a position is from
//! zone classifications, time of day, and location recency, and when an
//! emergency is reported it fans alerts out to the tourist's emergency
//! contacts and to tourists near the scene, across push, email, and SMS
//! with per-channel failure isolation.
//!
//! # API Endpoints
//!
//! - `POST /notifications` - Dispatch a notification
//! - `POST /emergencies` - Report an emergency (full alert flow)
//! - `POST /emergencies/:id/alert` - Follow-up alert to contacts
//! - `PATCH /emergencies/:id/status` - Lifecycle transition
//! - `GET /emergencies/:id` - Fetch one emergency record
//! - `POST /geofence-alerts` - Zone boundary crossing alert
//! - `GET /history/:user_id` and `/stats` - Delivery archive
//! - `PUT /preferences/:user_id` - Notification preferences
//! - `POST /push-tokens/:user_id` - Push token registry
//! - `POST /locations/:tourist_id` - Location heartbeat
//! - `GET /safety-score` - Safety score for a position
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use beacon::api::{self, AppState};
use beacon::broadcast::NoopBroadcaster;
use beacon::channels::{ExpoPushClient, HttpMailerClient, TwilioSmsClient};
use beacon::coordinator::{CoordinatorConfig, EmergencyCoordinator};
use beacon::dispatch::{DispatcherConfig, NotificationDispatcher};
use beacon::geo::{InMemoryLocationStore, StaticGeofenceIndex};
use beacon::history::HistoryStore;
use beacon::registry::InMemoryRecipientDirectory;
use beacon::scoring::SafetyScoreEngine;
use beacon::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:beacon.db?mode=rwc";

/// Default address of the mail relay.
const DEFAULT_MAILER_URL: &str = "http://localhost:8025";

/// Default sender address for outbound email.
const DEFAULT_MAILER_FROM: &str = "alerts@beacon.example";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("beacon=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("BEACON_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    let nearby_radius_meters = env::var("BEACON_NEARBY_RADIUS_M")
        .ok()
        .and_then(|r| r.parse().ok())
        .unwrap_or(CoordinatorConfig::default().nearby_radius_meters);

    info!(port, db_url = %db_url, "Starting Beacon server");

    // Persistent archive and emergency records
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    // Channel providers
    let push = match env::var("EXPO_PUSH_URL") {
        Ok(base_url) => ExpoPushClient::with_base_url(&base_url),
        Err(_) => ExpoPushClient::new(),
    };
    let email = HttpMailerClient::new(
        &env::var("MAILER_URL").unwrap_or_else(|_| DEFAULT_MAILER_URL.to_string()),
        env::var("MAILER_TOKEN").ok(),
        &env::var("MAILER_FROM").unwrap_or_else(|_| DEFAULT_MAILER_FROM.to_string()),
    );
    let sms = TwilioSmsClient::new(
        &env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
        &env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
        &env::var("TWILIO_FROM").unwrap_or_default(),
    );

    // Single-node collaborators; production wires the real geofencing,
    // presence, and WebSocket services in behind the same traits
    let directory = Arc::new(InMemoryRecipientDirectory::new());
    let locations = Arc::new(InMemoryLocationStore::new());
    let geofences = Arc::new(StaticGeofenceIndex::new());
    let broadcaster = Arc::new(NoopBroadcaster);

    let history: Arc<dyn HistoryStore> = Arc::new(storage.clone());
    let scoring = SafetyScoreEngine::new(geofences, locations.clone());
    let dispatcher = NotificationDispatcher::new(
        Arc::new(push),
        Arc::new(email),
        Arc::new(sms),
        history.clone(),
        DispatcherConfig::default(),
    );
    let coordinator = EmergencyCoordinator::new(
        Arc::new(storage),
        directory.clone(),
        locations.clone(),
        scoring.clone(),
        dispatcher.clone(),
        broadcaster.clone(),
        CoordinatorConfig {
            nearby_radius_meters,
        },
    );

    let state = AppState {
        dispatcher,
        coordinator,
        directory,
        history,
        locations,
        scoring,
        broadcaster,
    };

    // Build router
    let app = api::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Beacon is listening");

    axum::serve(listener, app).await?;

    Ok(())
}

//! Geospatial primitives and location tracking.
//!
//! # Collaborators
//!
//! The polygon geofencing engine and the live location pipeline are
//! separate services. This module talks to them through two traits:
//!
//! - [`GeofenceLookup`]: which classified zones contain a point
//! - [`LocationStore`]: last-known location per tourist
//!
//! In-memory implementations back tests and single-node deployments;
//! production wires the real services in behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::model::{Recipient, Severity};
use crate::registry::RecipientDirectory;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A WGS-84 point. Longitude first, matching the geofencing service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Great-circle distance between two points in meters (haversine).
pub fn haversine_distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Safety classification of a geofenced zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    VerySafe,
    Safe,
    Moderate,
    Unsafe,
    Dangerous,
}

impl SafetyLevel {
    /// Zone contribution on the 0-100 safety scale.
    pub fn score(&self) -> f64 {
        match self {
            SafetyLevel::VerySafe => 90.0,
            SafetyLevel::Safe => 75.0,
            SafetyLevel::Moderate => 50.0,
            SafetyLevel::Unsafe => 25.0,
            SafetyLevel::Dangerous => 10.0,
        }
    }

    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            SafetyLevel::VerySafe => "very safe",
            SafetyLevel::Safe => "safe",
            SafetyLevel::Moderate => "moderate",
            SafetyLevel::Unsafe => "unsafe",
            SafetyLevel::Dangerous => "dangerous",
        }
    }

    /// Severity of an alert about crossing into a zone of this level.
    pub fn alert_severity(&self) -> Severity {
        match self {
            SafetyLevel::Dangerous => Severity::Critical,
            SafetyLevel::Unsafe => Severity::High,
            SafetyLevel::Moderate => Severity::Medium,
            SafetyLevel::Safe | SafetyLevel::VerySafe => Severity::Low,
        }
    }
}

/// A classified zone returned by the geofencing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceZone {
    /// Display name ("Old Town", "Harbor district").
    pub name: String,

    /// Zone category as the geofencing service reports it.
    pub zone_type: String,

    /// Safety classification.
    pub safety_level: SafetyLevel,
}

/// Last-known position of a tourist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub coordinates: Coordinates,

    /// When the position was reported.
    pub timestamp: DateTime<Utc>,

    /// Whether the tourist has an active emergency.
    #[serde(default)]
    pub emergency: bool,
}

/// Zone containment lookups.
#[async_trait]
pub trait GeofenceLookup: Send + Sync {
    /// All classified zones containing the given point.
    async fn find_containing(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> anyhow::Result<Vec<GeofenceZone>>;
}

/// Last-known-location tracking per tourist.
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Latest sample for one tourist, if any was ever reported.
    async fn latest_location(&self, tourist_id: &str) -> anyhow::Result<Option<LocationSample>>;

    /// Record a location heartbeat. Preserves any active emergency flag.
    async fn record_location(
        &self,
        tourist_id: &str,
        coordinates: Coordinates,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Record an emergency position and raise the emergency flag.
    async fn mark_emergency(
        &self,
        tourist_id: &str,
        coordinates: Coordinates,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Lower the emergency flag once the emergency is resolved.
    async fn clear_emergency(&self, tourist_id: &str) -> anyhow::Result<()>;

    /// Latest sample for every tracked tourist.
    async fn all_latest(&self) -> anyhow::Result<Vec<(String, LocationSample)>>;
}

/// In-memory location store.
#[derive(Default)]
pub struct InMemoryLocationStore {
    samples: RwLock<HashMap<String, LocationSample>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn latest_location(&self, tourist_id: &str) -> anyhow::Result<Option<LocationSample>> {
        let samples = self
            .samples
            .read()
            .map_err(|_| anyhow::anyhow!("location store lock poisoned"))?;
        Ok(samples.get(tourist_id).cloned())
    }

    async fn record_location(
        &self,
        tourist_id: &str,
        coordinates: Coordinates,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| anyhow::anyhow!("location store lock poisoned"))?;
        let emergency = samples.get(tourist_id).map(|s| s.emergency).unwrap_or(false);
        samples.insert(
            tourist_id.to_string(),
            LocationSample {
                coordinates,
                timestamp: now,
                emergency,
            },
        );
        Ok(())
    }

    async fn mark_emergency(
        &self,
        tourist_id: &str,
        coordinates: Coordinates,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| anyhow::anyhow!("location store lock poisoned"))?;
        samples.insert(
            tourist_id.to_string(),
            LocationSample {
                coordinates,
                timestamp: now,
                emergency: true,
            },
        );
        Ok(())
    }

    async fn clear_emergency(&self, tourist_id: &str) -> anyhow::Result<()> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| anyhow::anyhow!("location store lock poisoned"))?;
        if let Some(sample) = samples.get_mut(tourist_id) {
            sample.emergency = false;
        }
        Ok(())
    }

    async fn all_latest(&self) -> anyhow::Result<Vec<(String, LocationSample)>> {
        let samples = self
            .samples
            .read()
            .map_err(|_| anyhow::anyhow!("location store lock poisoned"))?;
        Ok(samples
            .iter()
            .map(|(id, sample)| (id.clone(), sample.clone()))
            .collect())
    }
}

/// A circular zone for the static geofence index.
#[derive(Debug, Clone)]
pub struct CircularZone {
    pub zone: GeofenceZone,
    pub center: Coordinates,
    pub radius_meters: f64,
}

/// Static geofence index over circular zones.
///
/// Stands in for the polygon engine in tests and small deployments.
#[derive(Default)]
pub struct StaticGeofenceIndex {
    zones: Vec<CircularZone>,
}

impl StaticGeofenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a circular zone.
    pub fn with_zone(
        mut self,
        name: &str,
        zone_type: &str,
        safety_level: SafetyLevel,
        center: Coordinates,
        radius_meters: f64,
    ) -> Self {
        self.zones.push(CircularZone {
            zone: GeofenceZone {
                name: name.to_string(),
                zone_type: zone_type.to_string(),
                safety_level,
            },
            center,
            radius_meters,
        });
        self
    }
}

#[async_trait]
impl GeofenceLookup for StaticGeofenceIndex {
    async fn find_containing(
        &self,
        longitude: f64,
        latitude: f64,
    ) -> anyhow::Result<Vec<GeofenceZone>> {
        let point = Coordinates::new(longitude, latitude);
        Ok(self
            .zones
            .iter()
            .filter(|z| haversine_distance_meters(z.center, point) <= z.radius_meters)
            .map(|z| z.zone.clone())
            .collect())
    }
}

/// Resolves which recipients are near a point right now.
///
/// Pure adapter over [`LocationStore`] and [`RecipientDirectory`]; owns
/// no state of its own.
#[derive(Clone)]
pub struct ProximityIndex {
    locations: Arc<dyn LocationStore>,
    directory: Arc<dyn RecipientDirectory>,
}

impl ProximityIndex {
    pub fn new(locations: Arc<dyn LocationStore>, directory: Arc<dyn RecipientDirectory>) -> Self {
        Self {
            locations,
            directory,
        }
    }

    /// Recipients whose last-known location is within `radius_meters` of
    /// `center`. The boundary is inclusive; tourists who never reported a
    /// location are not candidates.
    pub async fn find_near(
        &self,
        center: Coordinates,
        radius_meters: f64,
    ) -> anyhow::Result<Vec<Recipient>> {
        let all = self.locations.all_latest().await?;
        let total_tracked = all.len();

        let nearby_ids: Vec<String> = all
            .into_iter()
            .filter(|(_, sample)| {
                haversine_distance_meters(center, sample.coordinates) <= radius_meters
            })
            .map(|(id, _)| id)
            .collect();

        debug!(
            nearby = nearby_ids.len(),
            tracked = total_tracked,
            radius_meters,
            "proximity query"
        );

        self.directory.resolve(&nearby_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRecipientDirectory;

    #[test]
    fn test_haversine_zero_distance() {
        let p = Coordinates::new(13.4050, 52.5200);
        assert_eq!(haversine_distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_haversine_paris_to_london() {
        let paris = Coordinates::new(2.3522, 48.8566);
        let london = Coordinates::new(-0.1276, 51.5074);

        let d = haversine_distance_meters(paris, london);
        // Known great-circle distance is roughly 343.5 km
        assert!(d > 340_000.0 && d < 348_000.0, "got {d}");
    }

    #[test]
    fn test_haversine_small_offset() {
        // 0.01 degrees of longitude at the equator is about 1.1 km
        let a = Coordinates::new(0.0, 0.0);
        let b = Coordinates::new(0.01, 0.0);

        let d = haversine_distance_meters(a, b);
        assert!(d > 1_100.0 && d < 1_125.0, "got {d}");
    }

    #[tokio::test]
    async fn test_location_store_emergency_flag() {
        let store = InMemoryLocationStore::new();
        let now = Utc::now();
        let p = Coordinates::new(100.5018, 13.7563);

        store.record_location("t1", p, now).await.unwrap();
        let sample = store.latest_location("t1").await.unwrap().unwrap();
        assert!(!sample.emergency);

        store.mark_emergency("t1", p, now).await.unwrap();
        assert!(store.latest_location("t1").await.unwrap().unwrap().emergency);

        // A later heartbeat keeps the flag raised
        store
            .record_location("t1", Coordinates::new(100.51, 13.76), now)
            .await
            .unwrap();
        assert!(store.latest_location("t1").await.unwrap().unwrap().emergency);

        store.clear_emergency("t1").await.unwrap();
        assert!(!store.latest_location("t1").await.unwrap().unwrap().emergency);
    }

    #[tokio::test]
    async fn test_static_geofence_containment() {
        let center = Coordinates::new(100.5018, 13.7563);
        let index = StaticGeofenceIndex::new().with_zone(
            "Harbor district",
            "district",
            SafetyLevel::Unsafe,
            center,
            500.0,
        );

        let inside = index.find_containing(100.5018, 13.7563).await.unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].safety_level, SafetyLevel::Unsafe);

        // A point a few kilometers away is outside the 500 m zone
        let outside = index.find_containing(100.55, 13.80).await.unwrap();
        assert!(outside.is_empty());
    }

    #[tokio::test]
    async fn test_find_near_inclusive_boundary() {
        let locations = Arc::new(InMemoryLocationStore::new());
        let directory = Arc::new(InMemoryRecipientDirectory::new());
        let now = Utc::now();

        let center = Coordinates::new(0.0, 0.0);
        let at_edge = Coordinates::new(0.01, 0.0);

        directory.upsert(Recipient::new("edge")).await.unwrap();
        directory.upsert(Recipient::new("far")).await.unwrap();
        directory.upsert(Recipient::new("untracked")).await.unwrap();

        locations.record_location("edge", at_edge, now).await.unwrap();
        locations
            .record_location("far", Coordinates::new(1.0, 0.0), now)
            .await
            .unwrap();

        let index = ProximityIndex::new(locations, directory);

        // Radius exactly equal to the edge distance still includes it
        let edge_distance = haversine_distance_meters(center, at_edge);
        let nearby = index.find_near(center, edge_distance).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, "edge");

        // Shrinking the radius below the edge distance excludes it
        let nearby = index.find_near(center, edge_distance - 1.0).await.unwrap();
        assert!(nearby.is_empty());
    }
}

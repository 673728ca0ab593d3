//! Location-based safety scoring.
//!
//! # Score Model
//!
//! A score starts from a neutral base and is adjusted by independent
//! signals: the safety classification of the zones containing the point,
//! the time of day, and how fresh the tourist's last-known location is.
//! The final score is clamped to [0, 100], higher is safer.
//!
//! Every signal that applied is reported back as a [`ScoreFactor`], so a
//! client can show *why* an area scored the way it did. A signal that is
//! missing or failed is omitted entirely, never treated as zero.

use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::geo::{Coordinates, GeofenceLookup, LocationStore};
use crate::model::{SafetyScoreResult, ScoreFactor};

/// Neutral starting score before any signal applies.
const BASE_SCORE: f64 = 70.0;

/// Bonus for daytime hours (06:00-18:59).
const DAYTIME_BONUS: f64 = 10.0;

/// Penalty for evening hours (19:00-22:59).
const EVENING_PENALTY: f64 = -5.0;

/// Penalty for late-night hours (23:00-05:59).
const NIGHT_PENALTY: f64 = -15.0;

/// Location samples younger than this earn the recent-activity bonus.
const RECENT_ACTIVITY_MINUTES: i64 = 10;

/// Bonus for a fresh location sample.
const RECENT_ACTIVITY_BONUS: f64 = 5.0;

/// Location samples older than this incur the staleness penalty.
const STALE_LOCATION_MINUTES: i64 = 60;

/// Penalty for a stale location sample.
const STALE_LOCATION_PENALTY: f64 = -10.0;

/// Computes explainable safety scores for a location.
#[derive(Clone)]
pub struct SafetyScoreEngine {
    geofences: Arc<dyn GeofenceLookup>,
    locations: Arc<dyn LocationStore>,
}

impl SafetyScoreEngine {
    /// Create a new engine over the given collaborators.
    pub fn new(geofences: Arc<dyn GeofenceLookup>, locations: Arc<dyn LocationStore>) -> Self {
        Self {
            geofences,
            locations,
        }
    }

    /// Compute the safety score for a point.
    ///
    /// Infallible: a collaborator failure drops that factor with a
    /// warning and the rest of the score still computes. Scoring must
    /// never be the reason an emergency alert does not go out.
    ///
    /// # Arguments
    ///
    /// * `tourist_id` - Whose location history to consult for the
    ///   recency factor; `None` scores the point alone
    /// * `coordinates` - The point being scored
    /// * `now` - Reference timestamp (typically current time)
    ///
    /// # Returns
    ///
    /// A `SafetyScoreResult` with the clamped score, every factor that
    /// applied, and the advice tier for the final score.
    pub async fn compute(
        &self,
        tourist_id: Option<&str>,
        coordinates: Coordinates,
        now: DateTime<Utc>,
    ) -> SafetyScoreResult {
        let mut score = BASE_SCORE;
        let mut factors = Vec::new();

        // Zone classification: blend the zone average into the running score
        match self
            .geofences
            .find_containing(coordinates.longitude, coordinates.latitude)
            .await
        {
            Ok(zones) if !zones.is_empty() => {
                let zone_avg =
                    zones.iter().map(|z| z.safety_level.score()).sum::<f64>() / zones.len() as f64;
                score = (score + zone_avg) / 2.0;

                let details = zones
                    .iter()
                    .map(|z| format!("{} ({})", z.name, z.safety_level.label()))
                    .collect::<Vec<_>>()
                    .join(", ");
                factors.push(ScoreFactor {
                    name: "geofence zones".to_string(),
                    impact: zone_avg - BASE_SCORE,
                    details,
                });
            }
            Ok(_) => {
                // Point is in no classified zone; no factor
            }
            Err(e) => {
                warn!(error = %e, "geofence lookup failed, skipping zone factor");
            }
        }

        // Time of day, from the reference timestamp's hour
        let hour = now.hour();
        let (time_impact, period) = if (6..19).contains(&hour) {
            (DAYTIME_BONUS, "daytime")
        } else if (19..23).contains(&hour) {
            (EVENING_PENALTY, "evening")
        } else {
            (NIGHT_PENALTY, "late night")
        };
        score += time_impact;
        factors.push(ScoreFactor {
            name: "time of day".to_string(),
            impact: time_impact,
            details: format!("{} ({:02}:00 UTC)", period, hour),
        });

        // Recency of the tourist's last-known location
        if let Some(tourist_id) = tourist_id {
            match self.locations.latest_location(tourist_id).await {
                Ok(Some(sample)) => {
                    let age_minutes = (now - sample.timestamp).num_minutes();
                    if age_minutes < RECENT_ACTIVITY_MINUTES {
                        score += RECENT_ACTIVITY_BONUS;
                        factors.push(ScoreFactor {
                            name: "recent activity".to_string(),
                            impact: RECENT_ACTIVITY_BONUS,
                            details: format!("location reported {} minutes ago", age_minutes),
                        });
                    } else if age_minutes > STALE_LOCATION_MINUTES {
                        score += STALE_LOCATION_PENALTY;
                        factors.push(ScoreFactor {
                            name: "location staleness".to_string(),
                            impact: STALE_LOCATION_PENALTY,
                            details: format!("last location is {} minutes old", age_minutes),
                        });
                    }
                    // Ages between the two thresholds contribute nothing
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, tourist_id, "location lookup failed, skipping recency factor");
                }
            }
        }

        let score = score.clamp(0.0, 100.0);

        SafetyScoreResult {
            score,
            base_score: BASE_SCORE,
            factors,
            recommendations: recommendations_for(score),
            computed_at: now,
        }
    }
}

/// Advice tier for a final score. Tiers are mutually exclusive, checked
/// strictest first.
fn recommendations_for(score: f64) -> Vec<String> {
    let advice: &[&str] = if score < 30.0 {
        &[
            "Move to a safer area immediately",
            "Contact local authorities if you feel threatened",
            "Share your live location with emergency contacts",
        ]
    } else if score < 50.0 {
        &[
            "Stay alert and aware of your surroundings",
            "Avoid isolated areas",
            "Keep emergency contact numbers handy",
        ]
    } else if score < 70.0 {
        &[
            "Monitor your surroundings",
            "Travel with others when possible",
        ]
    } else {
        &["Follow standard safety practices"]
    };

    advice.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeofenceZone, InMemoryLocationStore, SafetyLevel, StaticGeofenceIndex};
    use async_trait::async_trait;
    use chrono::TimeZone;

    const TEST_POINT: Coordinates = Coordinates {
        longitude: 100.5018,
        latitude: 13.7563,
    };

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, hour, 0, 0).unwrap()
    }

    fn engine_with_zone(
        safety_level: Option<SafetyLevel>,
    ) -> (SafetyScoreEngine, Arc<InMemoryLocationStore>) {
        let mut index = StaticGeofenceIndex::new();
        if let Some(level) = safety_level {
            index = index.with_zone("Test zone", "district", level, TEST_POINT, 1_000.0);
        }
        let locations = Arc::new(InMemoryLocationStore::new());
        let engine = SafetyScoreEngine::new(Arc::new(index), locations.clone());
        (engine, locations)
    }

    struct FailingGeofences;

    #[async_trait]
    impl GeofenceLookup for FailingGeofences {
        async fn find_containing(
            &self,
            _longitude: f64,
            _latitude: f64,
        ) -> anyhow::Result<Vec<GeofenceZone>> {
            Err(anyhow::anyhow!("geofence service down"))
        }
    }

    #[tokio::test]
    async fn test_daytime_no_zones() {
        let (engine, _) = engine_with_zone(None);

        let result = engine.compute(None, TEST_POINT, at_hour(12)).await;

        assert_eq!(result.score, 80.0);
        assert_eq!(result.factors.len(), 1);
        assert_eq!(result.factors[0].name, "time of day");
        assert_eq!(
            result.recommendations,
            vec!["Follow standard safety practices"]
        );
    }

    #[tokio::test]
    async fn test_time_of_day_boundaries() {
        let (engine, _) = engine_with_zone(None);

        // 06:00 is the first daytime hour, 19:00 the first evening hour,
        // 23:00 the first late-night hour
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(6)).await.score, 80.0);
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(18)).await.score, 80.0);
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(19)).await.score, 65.0);
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(22)).await.score, 65.0);
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(23)).await.score, 55.0);
        assert_eq!(engine.compute(None, TEST_POINT, at_hour(2)).await.score, 55.0);
    }

    #[tokio::test]
    async fn test_dangerous_zone_blends_toward_its_score() {
        let (engine, _) = engine_with_zone(Some(SafetyLevel::Dangerous));

        let result = engine.compute(None, TEST_POINT, at_hour(12)).await;

        // (70 + 10) / 2 = 40, then +10 for daytime
        assert_eq!(result.score, 50.0);
        let zone_factor = result
            .factors
            .iter()
            .find(|f| f.name == "geofence zones")
            .unwrap();
        assert_eq!(zone_factor.impact, -60.0);
        assert!(zone_factor.details.contains("dangerous"));
    }

    #[tokio::test]
    async fn test_multiple_zones_average() {
        let index = StaticGeofenceIndex::new()
            .with_zone("Safe area", "district", SafetyLevel::Safe, TEST_POINT, 1_000.0)
            .with_zone("Moderate area", "district", SafetyLevel::Moderate, TEST_POINT, 1_000.0);
        let engine = SafetyScoreEngine::new(
            Arc::new(index),
            Arc::new(InMemoryLocationStore::new()),
        );

        let result = engine.compute(None, TEST_POINT, at_hour(12)).await;

        // Zone average (75 + 50) / 2 = 62.5; (70 + 62.5) / 2 = 66.25; +10
        assert!((result.score - 76.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_recent_activity_bonus() {
        let (engine, locations) = engine_with_zone(None);
        let now = at_hour(12);
        locations
            .record_location("t1", TEST_POINT, now - chrono::Duration::minutes(5))
            .await
            .unwrap();

        let result = engine.compute(Some("t1"), TEST_POINT, now).await;

        assert_eq!(result.score, 85.0);
        assert!(result.factors.iter().any(|f| f.name == "recent activity"));
    }

    #[tokio::test]
    async fn test_stale_location_penalty() {
        let (engine, locations) = engine_with_zone(None);
        let now = at_hour(12);
        locations
            .record_location("t1", TEST_POINT, now - chrono::Duration::minutes(90))
            .await
            .unwrap();

        let result = engine.compute(Some("t1"), TEST_POINT, now).await;

        assert_eq!(result.score, 70.0);
        assert!(result.factors.iter().any(|f| f.name == "location staleness"));
    }

    #[tokio::test]
    async fn test_mid_age_location_is_neutral() {
        let (engine, locations) = engine_with_zone(None);
        let now = at_hour(12);

        // Exactly at both thresholds and in between: no recency factor
        for minutes in [10, 30, 60] {
            locations
                .record_location("t1", TEST_POINT, now - chrono::Duration::minutes(minutes))
                .await
                .unwrap();

            let result = engine.compute(Some("t1"), TEST_POINT, now).await;
            assert_eq!(result.score, 80.0, "age {} minutes", minutes);
            assert_eq!(result.factors.len(), 1, "age {} minutes", minutes);
        }
    }

    #[tokio::test]
    async fn test_unknown_tourist_has_no_recency_factor() {
        let (engine, _) = engine_with_zone(None);

        let result = engine.compute(Some("never-seen"), TEST_POINT, at_hour(12)).await;

        assert_eq!(result.score, 80.0);
        assert_eq!(result.factors.len(), 1);
    }

    #[tokio::test]
    async fn test_dangerous_zone_late_night_stale_location() {
        let (engine, locations) = engine_with_zone(Some(SafetyLevel::Dangerous));
        let now = at_hour(2);
        locations
            .record_location("t1", TEST_POINT, now - chrono::Duration::minutes(90))
            .await
            .unwrap();

        let result = engine.compute(Some("t1"), TEST_POINT, now).await;

        // (70 + 10) / 2 = 40, -15 late night, -10 staleness
        assert_eq!(result.score, 15.0);
        assert!(result.score >= 0.0 && result.score <= 100.0);
        assert_eq!(result.factors.len(), 3);
        assert!(
            result
                .recommendations
                .iter()
                .any(|r| r.contains("Contact local authorities"))
        );
    }

    #[tokio::test]
    async fn test_best_case_stays_in_bounds() {
        let (engine, locations) = engine_with_zone(Some(SafetyLevel::VerySafe));
        let now = at_hour(12);
        locations
            .record_location("t1", TEST_POINT, now - chrono::Duration::minutes(1))
            .await
            .unwrap();

        let result = engine.compute(Some("t1"), TEST_POINT, now).await;

        // (70 + 90) / 2 = 80, +10 daytime, +5 recent
        assert_eq!(result.score, 95.0);
        assert!(result.score <= 100.0);
    }

    #[tokio::test]
    async fn test_geofence_failure_degrades_to_remaining_factors() {
        let engine = SafetyScoreEngine::new(
            Arc::new(FailingGeofences),
            Arc::new(InMemoryLocationStore::new()),
        );

        let result = engine.compute(None, TEST_POINT, at_hour(12)).await;

        // Zone factor dropped, time factor still applies
        assert_eq!(result.score, 80.0);
        assert_eq!(result.factors.len(), 1);
        assert_eq!(result.factors[0].name, "time of day");
    }

    #[test]
    fn test_recommendation_tiers() {
        assert!(recommendations_for(29.9)[0].contains("Move to a safer area"));
        assert!(recommendations_for(30.0)[0].contains("Stay alert"));
        assert!(recommendations_for(49.9)[0].contains("Stay alert"));
        assert!(recommendations_for(50.0)[0].contains("Monitor"));
        assert!(recommendations_for(69.9)[0].contains("Monitor"));
        assert!(recommendations_for(70.0)[0].contains("standard safety practices"));
    }
}

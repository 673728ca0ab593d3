//! Real-time broadcast fan-out.
//!
//! WebSocket connections live in a separate realtime gateway. This module
//! defines the seam the alerting flow pushes events through; deployments
//! without a gateway wire in [`NoopBroadcaster`] and everything else
//! keeps working.

use async_trait::async_trait;
use tracing::debug;

use crate::geo::Coordinates;

/// Event fan-out to live connections.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Emit an event to every connected operations dashboard.
    async fn broadcast_to_dashboard(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Emit an event to connections near a point.
    async fn broadcast_to_nearby(
        &self,
        center: Coordinates,
        radius_meters: f64,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Emit an event to one connection.
    async fn emit_to(
        &self,
        connection_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Broadcaster for deployments without a realtime gateway.
///
/// Logs each event at debug level and drops it.
#[derive(Debug, Clone, Default)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn broadcast_to_dashboard(
        &self,
        event: &str,
        _payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        debug!(event, "no realtime gateway, dropping dashboard event");
        Ok(())
    }

    async fn broadcast_to_nearby(
        &self,
        _center: Coordinates,
        radius_meters: f64,
        event: &str,
        _payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        debug!(event, radius_meters, "no realtime gateway, dropping nearby event");
        Ok(())
    }

    async fn emit_to(
        &self,
        connection_id: &str,
        event: &str,
        _payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        debug!(connection_id, event, "no realtime gateway, dropping event");
        Ok(())
    }
}

//! Beacon - location-aware safety scoring and emergency alert fan-out.
//!
//! # Overview
//!
//! Beacon is the safety core of a travel platform. It computes a
//! bounded, explainable 0-100 safety score for any position, and fans
//! one logical alert out to many recipients over push, email, and SMS
//! with per-channel failure isolation, preference filtering, proximity
//! targeting, and an auditable delivery history.
//!
//! # Modules
//!
//! - [`model`]: Notifications, recipients, dispatch outcomes, history types
//! - [`geo`]: Coordinates, distances, zones, location tracking, proximity
//! - [`registry`]: Recipient delivery profiles and emergency contacts
//! - [`scoring`]: The safety score engine
//! - [`history`]: Bounded per-recipient delivery archive
//! - [`channels`]: Push, email, and SMS provider clients
//! - [`dispatch`]: The notification fan-out engine
//! - [`broadcast`]: Live-connection event fan-out
//! - [`coordinator`]: Emergency lifecycle orchestration
//! - [`storage`]: SQLite persistence
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod broadcast;
pub mod channels;
pub mod coordinator;
pub mod dispatch;
pub mod geo;
pub mod history;
pub mod model;
pub mod registry;
pub mod scoring;
pub mod storage;

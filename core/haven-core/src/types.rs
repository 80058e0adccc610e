//! Core types shared across all Haven clients.
//!
//! These are the persisted and boundary types of the safety subsystem. All
//! clients (mobile shell, desktop, web view) exchange exactly these shapes,
//! serialized as JSON inside the local store and across the client boundary.
//!
//! Transient engine state (zone membership, deviation flags) lives inside the
//! engines and is deliberately absent here: it is recomputed from live
//! positions and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Location
// ═══════════════════════════════════════════════════════════════════════════════

/// A single GPS fix pushed by the platform location source.
///
/// Read-only to every core component; positions are only persisted embedded
/// inside events, never on their own.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, when the platform reports one.
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Position {
            latitude,
            longitude,
            accuracy: None,
            timestamp,
        }
    }
}

/// One vertex of a safe route polyline.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Safe Zones & Routes
// ═══════════════════════════════════════════════════════════════════════════════

/// A named circular geofence. Entering an active zone auto-enables reduced
/// sensor sensitivity ("safe mode").
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SafeZone {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Invariant: strictly positive. Enforced at the store boundary.
    pub radius_meters: f64,
    pub is_active: bool,
}

/// A user-defined polyline the user intends to travel. Deviation beyond a
/// threshold while the route is active is treated as a possible emergency
/// signal.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SafeRoute {
    pub id: String,
    pub name: String,
    /// Ordered; a route needs at least 2 waypoints to be usable.
    pub waypoints: Vec<Waypoint>,
    /// At most one route is active at a time (enforced by the store).
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Events & Alerts
// ═══════════════════════════════════════════════════════════════════════════════

/// An emergency contact to notify on SOS or location share.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

/// What kind of outbound notification a pending event represents.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SosEventKind {
    Sos,
    LocationUpdate,
}

impl SosEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SosEventKind::Sos => "sos",
            SosEventKind::LocationUpdate => "location_update",
        }
    }
}

/// A durable record of an emergency trigger awaiting (or having received)
/// outbound delivery.
///
/// Created whenever an SOS or location share is requested, online or not —
/// the queue is the source of truth, the network is best-effort. Only the
/// sync pass flips `synced` to true, and only after confirmed delivery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingSosEvent {
    pub id: String,
    pub kind: SosEventKind,
    pub created_at: DateTime<Utc>,
    pub position: Option<Position>,
    pub contacts: Vec<Contact>,
    pub synced: bool,
    /// Opaque owner reference (user id) for multi-profile clients.
    pub user_ref: Option<String>,
}

/// Category of an alert-history entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Sos,
    CheckIn,
    SafeZone,
    LowBattery,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sos => "sos",
            AlertKind::CheckIn => "checkin",
            AlertKind::SafeZone => "safezone",
            AlertKind::LowBattery => "lowbattery",
        }
    }
}

/// One row of the user-visible alert history.
///
/// Invariant: at most one unresolved `Sos` entry exists at any time, enforced
/// by the engine's single-active-SOS guard.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AlertHistoryEntry {
    pub id: String,
    pub kind: AlertKind,
    pub created_at: DateTime<Utc>,
    pub position: Option<Position>,
    pub resolved: bool,
    pub notes: Option<String>,
    pub maps_url: Option<String>,
    /// Ids of recordings captured during this alert.
    pub recordings: Vec<String>,
}

/// How an SOS was initiated. Recorded in the alert notes for later review.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Button,
    Voice,
    Shake,
    RouteDeviation,
    ZoneExit,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Button => "button",
            TriggerType::Voice => "voice",
            TriggerType::Shake => "shake",
            TriggerType::RouteDeviation => "route_deviation",
            TriggerType::ZoneExit => "zone_exit",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recordings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordingKind {
    Audio,
    Video,
}

/// Evidence recording metadata, keyed by the alert it was captured for.
/// Holds a reference to the media (file path or blob URL), never the bytes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Recording {
    pub id: String,
    pub alert_id: String,
    pub kind: RecordingKind,
    pub created_at: DateTime<Utc>,
    pub data_ref: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session & Profile
// ═══════════════════════════════════════════════════════════════════════════════

/// Cached authentication state permitting offline SOS operation without a
/// live auth check. Single record; overwritten on login, cleared on logout.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CachedSession {
    pub user_id: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub phone_number: String,
    pub cached_at: DateTime<Utc>,
}

/// The locally cached user profile, including the emergency contact list the
/// sync pass notifies. Single record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub blood_group: Option<String>,
    pub medical_notes: Option<String>,
    pub emergency_contacts: Vec<Contact>,
}

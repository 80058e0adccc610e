//! SQLite persistence for the safety subsystem.
//!
//! `SafetyStore` is the single shared mutable resource of the crate: pending
//! SOS events, alert history, safe routes, safe zones, the cached session and
//! the user profile all live here and survive process restarts.
//!
//! # Schema versioning
//!
//! The schema version is tracked with `PRAGMA user_version` and migrations
//! are strictly additive: a new version may add tables or indexes but never
//! drops or rewrites existing collections. Reopening an old database runs
//! only the migrations it is missing.
//!
//! # Degraded mode
//!
//! If the database cannot be opened (corrupt file, unwritable directory),
//! [`SafetyStore::open_with_fallback`] hands back an in-memory store together
//! with [`StoreMode::MemoryOnly`]. Durability is lost for the session but the
//! SOS path keeps working, and the caller is told so it can surface the
//! degradation to the user.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{HavenError, Result};
use crate::types::{
    AlertHistoryEntry, AlertKind, CachedSession, Contact, PendingSosEvent, Position, Recording,
    RecordingKind, SafeRoute, SafeZone, SosEventKind, UserProfile, Waypoint,
};

/// Current schema version. Bump only with an additive migration.
const SCHEMA_VERSION: i64 = 2;

/// Whether the store is file-backed or fell back to memory for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMode {
    Durable,
    /// The database could not be opened; data written this session is lost on
    /// exit. `reason` is the open failure, for display to the user.
    MemoryOnly { reason: String },
}

/// The durable local store backing every persisted collection.
pub struct SafetyStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SafetyStore {
    /// Opens (or creates) the database at `path` and runs pending migrations.
    ///
    /// Idempotent: reopening an existing database preserves all collections.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| HavenError::Io {
                context: format!("creating store directory {}", parent.display()),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| HavenError::StoreUnavailable {
            path: path.to_path_buf(),
            details: source.to_string(),
        })?;

        let store = SafetyStore {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Opens an in-memory store. Used by tests and as the degraded-mode
    /// fallback; contents do not survive the process.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| HavenError::StoreUnavailable {
            path: PathBuf::from(":memory:"),
            details: source.to_string(),
        })?;
        let store = SafetyStore { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    /// Opens the store at `path`, falling back to an in-memory store when the
    /// file cannot be opened. The fallback is reported, never silent: the
    /// returned [`StoreMode`] tells the caller whether durability was lost.
    pub fn open_with_fallback(path: &Path) -> Result<(Self, StoreMode)> {
        match Self::open(path) {
            Ok(store) => Ok((store, StoreMode::Durable)),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Store unavailable, falling back to memory-only operation"
                );
                let reason = err.to_string();
                Ok((Self::in_memory()?, StoreMode::MemoryOnly { reason }))
            }
        }
    }

    /// Returns the database path, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| HavenError::store("reading schema version", e))?;

        if version < 1 {
            self.conn
                .execute_batch(
                    "BEGIN;
                     CREATE TABLE IF NOT EXISTS pending_sos_events (
                        id TEXT PRIMARY KEY,
                        kind TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        position TEXT,
                        contacts TEXT NOT NULL,
                        synced INTEGER NOT NULL DEFAULT 0,
                        user_ref TEXT
                     );
                     CREATE INDEX IF NOT EXISTS idx_pending_unsynced
                        ON pending_sos_events (created_at)
                        WHERE synced = 0;
                     CREATE TABLE IF NOT EXISTS alert_history (
                        id TEXT PRIMARY KEY,
                        kind TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        position TEXT,
                        resolved INTEGER NOT NULL DEFAULT 0,
                        notes TEXT,
                        maps_url TEXT,
                        recordings TEXT NOT NULL DEFAULT '[]'
                     );
                     CREATE TABLE IF NOT EXISTS safe_routes (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        waypoints TEXT NOT NULL,
                        is_active INTEGER NOT NULL DEFAULT 0,
                        created_at TEXT NOT NULL
                     );
                     CREATE TABLE IF NOT EXISTS safe_zones (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        latitude REAL NOT NULL,
                        longitude REAL NOT NULL,
                        radius_meters REAL NOT NULL,
                        is_active INTEGER NOT NULL DEFAULT 1
                     );
                     CREATE TABLE IF NOT EXISTS cached_session (
                        key TEXT PRIMARY KEY CHECK (key = 'current'),
                        payload TEXT NOT NULL
                     );
                     CREATE TABLE IF NOT EXISTS user_profile (
                        key TEXT PRIMARY KEY CHECK (key = 'current'),
                        payload TEXT NOT NULL
                     );
                     PRAGMA user_version = 1;
                     COMMIT;",
                )
                .map_err(|e| HavenError::store("migrating schema to v1", e))?;
        }

        if version < 2 {
            // Additive: recordings arrived after the initial schema. Existing
            // collections are untouched.
            self.conn
                .execute_batch(
                    "BEGIN;
                     CREATE TABLE IF NOT EXISTS recordings (
                        id TEXT PRIMARY KEY,
                        alert_id TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        data_ref TEXT NOT NULL
                     );
                     CREATE INDEX IF NOT EXISTS idx_recordings_alert
                        ON recordings (alert_id);
                     PRAGMA user_version = 2;
                     COMMIT;",
                )
                .map_err(|e| HavenError::store("migrating schema to v2", e))?;
        }

        debug!(version = SCHEMA_VERSION, "Store schema ready");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pending SOS events
    // ─────────────────────────────────────────────────────────────────────

    /// Upserts a pending event. The write is a single statement and succeeds
    /// with zero connectivity; this is the durability guarantee the SOS
    /// trigger relies on.
    pub fn put_pending_event(&self, event: &PendingSosEvent) -> Result<()> {
        let position = encode_optional(&event.position, "event position")?;
        let contacts = serde_json::to_string(&event.contacts)
            .map_err(|e| HavenError::json("encoding event contacts", e))?;

        self.conn
            .execute(
                "INSERT INTO pending_sos_events
                    (id, kind, created_at, position, contacts, synced, user_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    created_at = excluded.created_at,
                    position = excluded.position,
                    contacts = excluded.contacts,
                    synced = excluded.synced,
                    user_ref = excluded.user_ref",
                params![
                    event.id,
                    event.kind.as_str(),
                    event.created_at.to_rfc3339(),
                    position,
                    contacts,
                    event.synced as i64,
                    event.user_ref,
                ],
            )
            .map_err(|e| HavenError::store("inserting pending event", e))?;
        Ok(())
    }

    pub fn get_pending_event(&self, id: &str) -> Result<Option<PendingSosEvent>> {
        self.conn
            .query_row(
                "SELECT id, kind, created_at, position, contacts, synced, user_ref
                 FROM pending_sos_events WHERE id = ?1",
                params![id],
                row_to_pending_event,
            )
            .optional()
            .map_err(|e| HavenError::store("reading pending event", e))
    }

    /// All pending events, oldest first.
    pub fn list_pending_events(&self) -> Result<Vec<PendingSosEvent>> {
        self.query_events("SELECT id, kind, created_at, position, contacts, synced, user_ref
             FROM pending_sos_events ORDER BY created_at ASC, id ASC")
    }

    /// Secondary lookup: events still awaiting delivery, oldest first.
    pub fn list_unsynced_events(&self) -> Result<Vec<PendingSosEvent>> {
        self.query_events(
            "SELECT id, kind, created_at, position, contacts, synced, user_ref
             FROM pending_sos_events WHERE synced = 0 ORDER BY created_at ASC, id ASC",
        )
    }

    fn query_events(&self, sql: &str) -> Result<Vec<PendingSosEvent>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| HavenError::store("preparing event query", e))?;
        let rows = stmt
            .query_map([], row_to_pending_event)
            .map_err(|e| HavenError::store("querying events", e))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(|e| HavenError::store("decoding event row", e))?);
        }
        Ok(events)
    }

    /// Flips `synced` to true. Called only after the notifier confirmed
    /// delivery.
    pub fn mark_event_synced(&self, id: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE pending_sos_events SET synced = 1 WHERE id = ?1",
                params![id],
            )
            .map_err(|e| HavenError::store("marking event synced", e))?;
        if updated == 0 {
            return Err(HavenError::EventNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete_pending_event(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_sos_events WHERE id = ?1", params![id])
            .map_err(|e| HavenError::store("deleting pending event", e))?;
        Ok(())
    }

    pub fn clear_pending_events(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_sos_events", [])
            .map_err(|e| HavenError::store("clearing pending events", e))?;
        Ok(())
    }

    /// Deletes synced events beyond the `keep_most_recent` newest ones.
    /// Unsynced events are never touched. Returns how many rows were removed.
    pub fn prune_synced_events(&self, keep_most_recent: usize) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM pending_sos_events
                 WHERE synced = 1 AND id NOT IN (
                    SELECT id FROM pending_sos_events WHERE synced = 1
                    ORDER BY created_at DESC, id DESC LIMIT ?1
                 )",
                params![keep_most_recent as i64],
            )
            .map_err(|e| HavenError::store("pruning synced events", e))?;
        if removed > 0 {
            debug!(removed, "Pruned synced events");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Alert history
    // ─────────────────────────────────────────────────────────────────────

    pub fn put_alert(&self, alert: &AlertHistoryEntry) -> Result<()> {
        let position = encode_optional(&alert.position, "alert position")?;
        let recordings = serde_json::to_string(&alert.recordings)
            .map_err(|e| HavenError::json("encoding alert recordings", e))?;

        self.conn
            .execute(
                "INSERT INTO alert_history
                    (id, kind, created_at, position, resolved, notes, maps_url, recordings)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    created_at = excluded.created_at,
                    position = excluded.position,
                    resolved = excluded.resolved,
                    notes = excluded.notes,
                    maps_url = excluded.maps_url,
                    recordings = excluded.recordings",
                params![
                    alert.id,
                    alert.kind.as_str(),
                    alert.created_at.to_rfc3339(),
                    position,
                    alert.resolved as i64,
                    alert.notes,
                    alert.maps_url,
                    recordings,
                ],
            )
            .map_err(|e| HavenError::store("inserting alert", e))?;
        Ok(())
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<AlertHistoryEntry>> {
        self.conn
            .query_row(
                "SELECT id, kind, created_at, position, resolved, notes, maps_url, recordings
                 FROM alert_history WHERE id = ?1",
                params![id],
                row_to_alert,
            )
            .optional()
            .map_err(|e| HavenError::store("reading alert", e))
    }

    /// Alert history, newest first.
    pub fn list_alerts(&self) -> Result<Vec<AlertHistoryEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, created_at, position, resolved, notes, maps_url, recordings
                 FROM alert_history ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| HavenError::store("preparing alert query", e))?;
        let rows = stmt
            .query_map([], row_to_alert)
            .map_err(|e| HavenError::store("querying alerts", e))?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row.map_err(|e| HavenError::store("decoding alert row", e))?);
        }
        Ok(alerts)
    }

    /// Marks an alert resolved with the given note.
    pub fn resolve_alert(&self, id: &str, notes: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE alert_history SET resolved = 1, notes = ?2 WHERE id = ?1",
                params![id, notes],
            )
            .map_err(|e| HavenError::store("resolving alert", e))?;
        if updated == 0 {
            return Err(HavenError::AlertNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Appends a recording id to an alert's recording list.
    pub fn attach_recording_ref(&self, alert_id: &str, recording_id: &str) -> Result<()> {
        let mut alert = self
            .get_alert(alert_id)?
            .ok_or_else(|| HavenError::AlertNotFound(alert_id.to_string()))?;
        if !alert.recordings.iter().any(|r| r == recording_id) {
            alert.recordings.push(recording_id.to_string());
            self.put_alert(&alert)?;
        }
        Ok(())
    }

    pub fn clear_alerts(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM alert_history", [])
            .map_err(|e| HavenError::store("clearing alert history", e))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Safe routes
    // ─────────────────────────────────────────────────────────────────────

    /// Upserts a route. Rejects routes with fewer than 2 waypoints before
    /// anything is written.
    pub fn put_route(&self, route: &SafeRoute) -> Result<()> {
        if route.waypoints.len() < 2 {
            return Err(HavenError::InvalidInput(format!(
                "a safe route needs at least 2 waypoints (got {})",
                route.waypoints.len()
            )));
        }
        let waypoints = serde_json::to_string(&route.waypoints)
            .map_err(|e| HavenError::json("encoding route waypoints", e))?;

        self.conn
            .execute(
                "INSERT INTO safe_routes (id, name, waypoints, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    waypoints = excluded.waypoints,
                    is_active = excluded.is_active,
                    created_at = excluded.created_at",
                params![
                    route.id,
                    route.name,
                    waypoints,
                    route.is_active as i64,
                    route.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| HavenError::store("inserting route", e))?;
        Ok(())
    }

    pub fn get_route(&self, id: &str) -> Result<Option<SafeRoute>> {
        self.conn
            .query_row(
                "SELECT id, name, waypoints, is_active, created_at
                 FROM safe_routes WHERE id = ?1",
                params![id],
                row_to_route,
            )
            .optional()
            .map_err(|e| HavenError::store("reading route", e))
    }

    pub fn list_routes(&self) -> Result<Vec<SafeRoute>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, waypoints, is_active, created_at
                 FROM safe_routes ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| HavenError::store("preparing route query", e))?;
        let rows = stmt
            .query_map([], row_to_route)
            .map_err(|e| HavenError::store("querying routes", e))?;

        let mut routes = Vec::new();
        for row in rows {
            routes.push(row.map_err(|e| HavenError::store("decoding route row", e))?);
        }
        Ok(routes)
    }

    /// Activates one route and deactivates every other in a single
    /// statement, so at most one route is ever active. An unknown id is
    /// rejected before anything is touched; the previously active route
    /// stays active.
    pub fn set_route_active(&self, id: &str) -> Result<SafeRoute> {
        let mut route = self
            .get_route(id)?
            .ok_or_else(|| HavenError::RouteNotFound(id.to_string()))?;
        self.conn
            .execute(
                "UPDATE safe_routes SET is_active = (id = ?1)",
                params![id],
            )
            .map_err(|e| HavenError::store("activating route", e))?;
        route.is_active = true;
        Ok(route)
    }

    /// Clears the active flag on every route.
    pub fn deactivate_routes(&self) -> Result<()> {
        self.conn
            .execute("UPDATE safe_routes SET is_active = 0", [])
            .map_err(|e| HavenError::store("deactivating routes", e))?;
        Ok(())
    }

    pub fn active_route(&self) -> Result<Option<SafeRoute>> {
        self.conn
            .query_row(
                "SELECT id, name, waypoints, is_active, created_at
                 FROM safe_routes WHERE is_active = 1 LIMIT 1",
                [],
                row_to_route,
            )
            .optional()
            .map_err(|e| HavenError::store("reading active route", e))
    }

    pub fn delete_route(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM safe_routes WHERE id = ?1", params![id])
            .map_err(|e| HavenError::store("deleting route", e))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Safe zones
    // ─────────────────────────────────────────────────────────────────────

    /// Upserts a zone. Rejects a non-positive radius before anything is
    /// written.
    pub fn put_zone(&self, zone: &SafeZone) -> Result<()> {
        if zone.radius_meters <= 0.0 {
            return Err(HavenError::InvalidInput(format!(
                "safe zone radius must be positive (got {})",
                zone.radius_meters
            )));
        }

        self.conn
            .execute(
                "INSERT INTO safe_zones (id, name, latitude, longitude, radius_meters, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    radius_meters = excluded.radius_meters,
                    is_active = excluded.is_active",
                params![
                    zone.id,
                    zone.name,
                    zone.latitude,
                    zone.longitude,
                    zone.radius_meters,
                    zone.is_active as i64,
                ],
            )
            .map_err(|e| HavenError::store("inserting zone", e))?;
        Ok(())
    }

    pub fn get_zone(&self, id: &str) -> Result<Option<SafeZone>> {
        self.conn
            .query_row(
                "SELECT id, name, latitude, longitude, radius_meters, is_active
                 FROM safe_zones WHERE id = ?1",
                params![id],
                row_to_zone,
            )
            .optional()
            .map_err(|e| HavenError::store("reading zone", e))
    }

    /// All zones in stable insertion order. The geofence engine's first-match
    /// overlap tie-break depends on this order being deterministic.
    pub fn list_zones(&self) -> Result<Vec<SafeZone>> {
        self.query_zones(
            "SELECT id, name, latitude, longitude, radius_meters, is_active
             FROM safe_zones ORDER BY rowid ASC",
        )
    }

    pub fn list_active_zones(&self) -> Result<Vec<SafeZone>> {
        self.query_zones(
            "SELECT id, name, latitude, longitude, radius_meters, is_active
             FROM safe_zones WHERE is_active = 1 ORDER BY rowid ASC",
        )
    }

    fn query_zones(&self, sql: &str) -> Result<Vec<SafeZone>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| HavenError::store("preparing zone query", e))?;
        let rows = stmt
            .query_map([], row_to_zone)
            .map_err(|e| HavenError::store("querying zones", e))?;

        let mut zones = Vec::new();
        for row in rows {
            zones.push(row.map_err(|e| HavenError::store("decoding zone row", e))?);
        }
        Ok(zones)
    }

    pub fn delete_zone(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM safe_zones WHERE id = ?1", params![id])
            .map_err(|e| HavenError::store("deleting zone", e))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cached session & user profile (single-record collections)
    // ─────────────────────────────────────────────────────────────────────

    pub fn put_session(&self, session: &CachedSession) -> Result<()> {
        self.put_singleton("cached_session", session, "encoding cached session")
    }

    pub fn get_session(&self) -> Result<Option<CachedSession>> {
        self.get_singleton("cached_session", "decoding cached session")
    }

    pub fn clear_session(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM cached_session", [])
            .map_err(|e| HavenError::store("clearing cached session", e))?;
        Ok(())
    }

    pub fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        self.put_singleton("user_profile", profile, "encoding user profile")
    }

    pub fn get_profile(&self) -> Result<Option<UserProfile>> {
        self.get_singleton("user_profile", "decoding user profile")
    }

    fn put_singleton<T: serde::Serialize>(
        &self,
        table: &str,
        value: &T,
        context: &str,
    ) -> Result<()> {
        let payload =
            serde_json::to_string(value).map_err(|e| HavenError::json(context, e))?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {table} (key, payload) VALUES ('current', ?1)
                     ON CONFLICT(key) DO UPDATE SET payload = excluded.payload"
                ),
                params![payload],
            )
            .map_err(|e| HavenError::store(format!("writing {table}"), e))?;
        Ok(())
    }

    fn get_singleton<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        context: &str,
    ) -> Result<Option<T>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT payload FROM {table} WHERE key = 'current'"),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| HavenError::store(format!("reading {table}"), e))?;

        match payload {
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| HavenError::json(context, e)),
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recordings
    // ─────────────────────────────────────────────────────────────────────

    pub fn put_recording(&self, recording: &Recording) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO recordings (id, alert_id, kind, created_at, data_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    alert_id = excluded.alert_id,
                    kind = excluded.kind,
                    created_at = excluded.created_at,
                    data_ref = excluded.data_ref",
                params![
                    recording.id,
                    recording.alert_id,
                    recording_kind_str(recording.kind),
                    recording.created_at.to_rfc3339(),
                    recording.data_ref,
                ],
            )
            .map_err(|e| HavenError::store("inserting recording", e))?;
        Ok(())
    }

    /// Secondary lookup: recordings captured for one alert, oldest first.
    pub fn recordings_for_alert(&self, alert_id: &str) -> Result<Vec<Recording>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, alert_id, kind, created_at, data_ref
                 FROM recordings WHERE alert_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| HavenError::store("preparing recording query", e))?;
        let rows = stmt
            .query_map(params![alert_id], row_to_recording)
            .map_err(|e| HavenError::store("querying recordings", e))?;

        let mut recordings = Vec::new();
        for row in rows {
            recordings.push(row.map_err(|e| HavenError::store("decoding recording row", e))?);
        }
        Ok(recordings)
    }

    pub fn delete_recording(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM recordings WHERE id = ?1", params![id])
            .map_err(|e| HavenError::store("deleting recording", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────

fn encode_optional<T: serde::Serialize>(
    value: &Option<T>,
    context: &str,
) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| HavenError::json(context, e)))
        .transpose()
}

fn decode_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    payload: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn decode_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn event_kind_from_str(idx: usize, value: &str) -> rusqlite::Result<SosEventKind> {
    match value {
        "sos" => Ok(SosEventKind::Sos),
        "location_update" => Ok(SosEventKind::LocationUpdate),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown event kind: {other}").into(),
        )),
    }
}

fn alert_kind_from_str(idx: usize, value: &str) -> rusqlite::Result<AlertKind> {
    match value {
        "sos" => Ok(AlertKind::Sos),
        "checkin" => Ok(AlertKind::CheckIn),
        "safezone" => Ok(AlertKind::SafeZone),
        "lowbattery" => Ok(AlertKind::LowBattery),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown alert kind: {other}").into(),
        )),
    }
}

fn recording_kind_str(kind: RecordingKind) -> &'static str {
    match kind {
        RecordingKind::Audio => "audio",
        RecordingKind::Video => "video",
    }
}

fn row_to_pending_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingSosEvent> {
    let kind: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let position: Option<String> = row.get(3)?;
    let contacts: String = row.get(4)?;

    Ok(PendingSosEvent {
        id: row.get(0)?,
        kind: event_kind_from_str(1, &kind)?,
        created_at: decode_timestamp(2, &created_at)?,
        position: position
            .map(|p| decode_json::<Position>(3, &p))
            .transpose()?,
        contacts: decode_json::<Vec<Contact>>(4, &contacts)?,
        synced: row.get::<_, i64>(5)? != 0,
        user_ref: row.get(6)?,
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertHistoryEntry> {
    let kind: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let position: Option<String> = row.get(3)?;
    let recordings: String = row.get(7)?;

    Ok(AlertHistoryEntry {
        id: row.get(0)?,
        kind: alert_kind_from_str(1, &kind)?,
        created_at: decode_timestamp(2, &created_at)?,
        position: position
            .map(|p| decode_json::<Position>(3, &p))
            .transpose()?,
        resolved: row.get::<_, i64>(4)? != 0,
        notes: row.get(5)?,
        maps_url: row.get(6)?,
        recordings: decode_json::<Vec<String>>(7, &recordings)?,
    })
}

fn row_to_route(row: &rusqlite::Row<'_>) -> rusqlite::Result<SafeRoute> {
    let waypoints: String = row.get(2)?;
    let created_at: String = row.get(4)?;

    Ok(SafeRoute {
        id: row.get(0)?,
        name: row.get(1)?,
        waypoints: decode_json::<Vec<Waypoint>>(2, &waypoints)?,
        is_active: row.get::<_, i64>(3)? != 0,
        created_at: decode_timestamp(4, &created_at)?,
    })
}

fn row_to_zone(row: &rusqlite::Row<'_>) -> rusqlite::Result<SafeZone> {
    Ok(SafeZone {
        id: row.get(0)?,
        name: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        radius_meters: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}

fn row_to_recording(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recording> {
    let kind: String = row.get(2)?;
    let created_at: String = row.get(3)?;

    Ok(Recording {
        id: row.get(0)?,
        alert_id: row.get(1)?,
        kind: match kind.as_str() {
            "audio" => RecordingKind::Audio,
            "video" => RecordingKind::Video,
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown recording kind: {other}").into(),
                ))
            }
        },
        created_at: decode_timestamp(3, &created_at)?,
        data_ref: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, synced: bool, minute: u32) -> PendingSosEvent {
        PendingSosEvent {
            id: id.to_string(),
            kind: SosEventKind::Sos,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap(),
            position: Some(Position::new(
                12.9716,
                77.5946,
                Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap(),
            )),
            contacts: vec![Contact {
                name: "Asha".to_string(),
                phone: "+15550001".to_string(),
            }],
            synced,
            user_ref: None,
        }
    }

    fn route(id: &str, active: bool) -> SafeRoute {
        SafeRoute {
            id: id.to_string(),
            name: "home to campus".to_string(),
            waypoints: vec![
                Waypoint {
                    latitude: 12.97,
                    longitude: 77.59,
                },
                Waypoint {
                    latitude: 12.98,
                    longitude: 77.60,
                },
            ],
            is_active: active,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_unsynced_lookup_excludes_synced_events() {
        let store = SafetyStore::in_memory().unwrap();
        store.put_pending_event(&event("e1", false, 0)).unwrap();
        store.put_pending_event(&event("e2", true, 1)).unwrap();
        store.put_pending_event(&event("e3", false, 2)).unwrap();

        let unsynced = store.list_unsynced_events().unwrap();
        let ids: Vec<_> = unsynced.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
    }

    #[test]
    fn test_mark_event_synced() {
        let store = SafetyStore::in_memory().unwrap();
        store.put_pending_event(&event("e1", false, 0)).unwrap();
        store.mark_event_synced("e1").unwrap();
        assert!(store.get_pending_event("e1").unwrap().unwrap().synced);
        assert!(store.list_unsynced_events().unwrap().is_empty());
    }

    #[test]
    fn test_mark_unknown_event_fails() {
        let store = SafetyStore::in_memory().unwrap();
        assert!(matches!(
            store.mark_event_synced("ghost"),
            Err(HavenError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_prune_keeps_newest_synced_and_all_unsynced() {
        let store = SafetyStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .put_pending_event(&event(&format!("s{i}"), true, i))
                .unwrap();
        }
        store.put_pending_event(&event("pending", false, 10)).unwrap();

        let removed = store.prune_synced_events(2).unwrap();
        assert_eq!(removed, 3);

        let remaining = store.list_pending_events().unwrap();
        let ids: Vec<_> = remaining.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s4", "pending"]);
    }

    #[test]
    fn test_route_persistence_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("safety.db");

        let original = route("r1", true);
        {
            let store = SafetyStore::open(&path).unwrap();
            store.put_route(&original).unwrap();
        }

        let store = SafetyStore::open(&path).unwrap();
        let loaded = store.get_route("r1").unwrap().unwrap();
        assert_eq!(loaded.waypoints, original.waypoints);
        assert_eq!(loaded.is_active, original.is_active);
    }

    #[test]
    fn test_route_with_one_waypoint_rejected() {
        let store = SafetyStore::in_memory().unwrap();
        let mut bad = route("r1", false);
        bad.waypoints.truncate(1);
        assert!(matches!(
            store.put_route(&bad),
            Err(HavenError::InvalidInput(_))
        ));
        assert!(store.list_routes().unwrap().is_empty());
    }

    #[test]
    fn test_set_route_active_deactivates_others() {
        let store = SafetyStore::in_memory().unwrap();
        store.put_route(&route("r1", true)).unwrap();
        store.put_route(&route("r2", false)).unwrap();

        store.set_route_active("r2").unwrap();

        assert!(!store.get_route("r1").unwrap().unwrap().is_active);
        assert!(store.get_route("r2").unwrap().unwrap().is_active);
        assert_eq!(store.active_route().unwrap().unwrap().id, "r2");
    }

    #[test]
    fn test_activating_unknown_route_leaves_active_route_intact() {
        let store = SafetyStore::in_memory().unwrap();
        store.put_route(&route("r1", false)).unwrap();
        store.set_route_active("r1").unwrap();

        assert!(matches!(
            store.set_route_active("ghost"),
            Err(HavenError::RouteNotFound(_))
        ));
        // The failed activation touched nothing: r1 is still the active one.
        assert_eq!(store.active_route().unwrap().unwrap().id, "r1");
    }

    #[test]
    fn test_zone_with_zero_radius_rejected() {
        let store = SafetyStore::in_memory().unwrap();
        let zone = SafeZone {
            id: "z1".to_string(),
            name: "home".to_string(),
            latitude: 12.97,
            longitude: 77.59,
            radius_meters: 0.0,
            is_active: true,
        };
        assert!(matches!(
            store.put_zone(&zone),
            Err(HavenError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_session_overwrite_and_clear() {
        let store = SafetyStore::in_memory().unwrap();
        let mut session = CachedSession {
            user_id: "u1".to_string(),
            session_token: "tok-a".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            phone_number: "+15550001".to_string(),
            cached_at: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        };
        store.put_session(&session).unwrap();

        session.session_token = "tok-b".to_string();
        store.put_session(&session).unwrap();
        assert_eq!(
            store.get_session().unwrap().unwrap().session_token,
            "tok-b"
        );

        store.clear_session().unwrap();
        assert!(store.get_session().unwrap().is_none());
    }

    #[test]
    fn test_reopen_preserves_data_across_migrations() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("safety.db");

        {
            let store = SafetyStore::open(&path).unwrap();
            store.put_pending_event(&event("e1", false, 0)).unwrap();
        }

        // Second open re-runs migrate() against an up-to-date schema.
        let store = SafetyStore::open(&path).unwrap();
        assert_eq!(store.list_pending_events().unwrap().len(), 1);
    }

    #[test]
    fn test_open_with_fallback_degrades_to_memory() {
        let temp = tempfile::tempdir().unwrap();
        // A directory where the database file should be makes open() fail.
        let path = temp.path().join("safety.db");
        fs_err::create_dir_all(&path).unwrap();

        let (store, mode) = SafetyStore::open_with_fallback(&path).unwrap();
        assert!(matches!(mode, StoreMode::MemoryOnly { .. }));

        // Degraded store still accepts writes for the session.
        store.put_pending_event(&event("e1", false, 0)).unwrap();
        assert_eq!(store.list_unsynced_events().unwrap().len(), 1);
    }

    #[test]
    fn test_recordings_keyed_by_alert() {
        let store = SafetyStore::in_memory().unwrap();
        let rec = Recording {
            id: "rec1".to_string(),
            alert_id: "a1".to_string(),
            kind: RecordingKind::Audio,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            data_ref: "blob:rec1".to_string(),
        };
        store.put_recording(&rec).unwrap();

        assert_eq!(store.recordings_for_alert("a1").unwrap(), vec![rec]);
        assert!(store.recordings_for_alert("other").unwrap().is_empty());
    }

    #[test]
    fn test_zone_listing_is_stable_insertion_order() {
        let store = SafetyStore::in_memory().unwrap();
        for (i, name) in ["home", "office", "gym"].iter().enumerate() {
            store
                .put_zone(&SafeZone {
                    id: format!("z{i}"),
                    name: name.to_string(),
                    latitude: 12.97,
                    longitude: 77.59,
                    radius_meters: 100.0,
                    is_active: true,
                })
                .unwrap();
        }
        let names: Vec<_> = store
            .list_active_zones()
            .unwrap()
            .into_iter()
            .map(|z| z.name)
            .collect();
        assert_eq!(names, vec!["home", "office", "gym"]);
    }
}

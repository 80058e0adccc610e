//! HavenEngine - the main entry point for Haven clients.
//!
//! One engine is constructed per application session and passed explicitly to
//! callers; there is no ambient global state. The engine owns the store
//! handle, the geofence and route engines, the connectivity monitor, and the
//! sync manager, and exposes the single trigger/cancel/confirm surface the UI
//! consumes.
//!
//! ## Interleaving
//!
//! The engine is synchronous and not thread-safe; clients provide their own
//! synchronization. Because store writes and notifier calls can suspend in a
//! wrapping async client, every invariant that guards them ("only one active
//! SOS") is captured in engine state *before* the first fallible call, so two
//! interleaved triggers cannot both observe an inactive SOS.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::connectivity::{ConnectivityMonitor, ConnectivityTransition};
use crate::error::{HavenError, Result};
use crate::geofence::{GeofenceEngine, ZoneTransition};
use crate::route::{RouteMonitor, DEFAULT_DEVIATION_THRESHOLD_METERS};
use crate::storage::StorageConfig;
use crate::store::{SafetyStore, StoreMode};
use crate::sync::{maps_url, AlertNotifier, ShareOutcome, ShareSurface, SyncManager, SyncReport};
use crate::types::{
    AlertHistoryEntry, AlertKind, CachedSession, Contact, Position, SafeRoute, SafeZone,
    SosEventKind, TriggerType, UserProfile,
};

/// Result of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SosOutcome {
    /// A new SOS started; both records are already durable.
    Triggered { alert_id: String, event_id: String },
    /// An SOS is already active; the request was ignored (idempotent, not an
    /// error).
    AlreadyActive,
}

/// A safety event produced by a position update, for the UI to surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvent {
    EnteredZone(SafeZone),
    ExitedZone(SafeZone),
    RouteDeviation { route_id: String, distance_meters: f64 },
}

/// The safety aggregator: owns current location, zone state, route state,
/// the durable queue, and the alert lifecycle.
pub struct HavenEngine {
    store: SafetyStore,
    store_mode: StoreMode,
    geofence: GeofenceEngine,
    route_monitor: RouteMonitor,
    connectivity: ConnectivityMonitor,
    sync: SyncManager,
    notifier: Box<dyn AlertNotifier>,
    share_surface: Option<Box<dyn ShareSurface>>,

    last_position: Option<Position>,
    sos_active: bool,
    active_alert_id: Option<String>,
    safe_mode: bool,
    voice_detection_enabled: bool,
    check_in_deadline: Option<DateTime<Utc>>,
    deviation_threshold_meters: f64,
}

impl HavenEngine {
    /// Opens the engine against the configured storage root.
    ///
    /// If the database cannot be opened the engine comes up in memory-only
    /// degraded mode rather than failing; check [`HavenEngine::store_mode`]
    /// and surface it to the user.
    pub fn open(config: &StorageConfig, notifier: Box<dyn AlertNotifier>) -> Result<Self> {
        let (store, store_mode) = SafetyStore::open_with_fallback(&config.db_path())?;
        Ok(Self::with_store(store, store_mode, notifier))
    }

    /// Builds an engine around an existing store. Used by tests with an
    /// in-memory store.
    pub fn with_store(store: SafetyStore, store_mode: StoreMode, notifier: Box<dyn AlertNotifier>) -> Self {
        let mut sync = SyncManager::new();
        if let Ok(Some(profile)) = store.get_profile() {
            sync.set_user_name(Some(profile.name));
        }

        HavenEngine {
            store,
            store_mode,
            geofence: GeofenceEngine::new(),
            route_monitor: RouteMonitor::new(),
            connectivity: ConnectivityMonitor::new(),
            sync,
            notifier,
            share_surface: None,
            last_position: None,
            sos_active: false,
            active_alert_id: None,
            safe_mode: false,
            voice_detection_enabled: true,
            check_in_deadline: None,
            deviation_threshold_meters: DEFAULT_DEVIATION_THRESHOLD_METERS,
        }
    }

    /// Injects the optional native share sheet.
    pub fn set_share_surface(&mut self, surface: Box<dyn ShareSurface>) {
        self.share_surface = Some(surface);
    }

    pub fn store(&self) -> &SafetyStore {
        &self.store
    }

    /// Whether this session is durable or running memory-only after a store
    /// open failure.
    pub fn store_mode(&self) -> &StoreMode {
        &self.store_mode
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // SOS lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_sos_active(&self) -> bool {
        self.sos_active
    }

    pub fn active_alert_id(&self) -> Option<&str> {
        self.active_alert_id.as_deref()
    }

    /// Starts an SOS: appends an unresolved alert, durably enqueues the
    /// outbound event, and if online runs a sync pass immediately.
    ///
    /// A second trigger while one is active is ignored — repeated button
    /// presses or voice keyword hits must not spam the queue.
    pub fn trigger_sos(
        &mut self,
        trigger: TriggerType,
        position: Option<Position>,
    ) -> Result<SosOutcome> {
        if self.sos_active {
            info!(trigger = trigger.as_str(), "SOS already active, ignoring trigger");
            return Ok(SosOutcome::AlreadyActive);
        }

        // Claim the active slot before any fallible work so an interleaved
        // second trigger sees it immediately.
        let alert_id = ulid::Ulid::new().to_string();
        self.sos_active = true;
        self.active_alert_id = Some(alert_id.clone());

        let position = position.or_else(|| self.last_position.clone());
        let alert = AlertHistoryEntry {
            id: alert_id.clone(),
            kind: AlertKind::Sos,
            created_at: Utc::now(),
            position: position.clone(),
            resolved: false,
            notes: Some(format!("triggered by {}", trigger.as_str())),
            maps_url: position.as_ref().map(maps_url),
            recordings: Vec::new(),
        };

        if let Err(err) = self.store.put_alert(&alert) {
            self.sos_active = false;
            self.active_alert_id = None;
            return Err(err);
        }

        let event_id = match self.sync.enqueue(
            &self.store,
            SosEventKind::Sos,
            position,
            self.emergency_contacts(),
            self.user_ref(),
        ) {
            Ok(id) => id,
            Err(err) => {
                self.sos_active = false;
                self.active_alert_id = None;
                return Err(err);
            }
        };

        info!(alert_id = %alert_id, trigger = trigger.as_str(), "SOS triggered");

        // Both records are durable at this point; nothing the sync pass does
        // may fail the trigger. Delivery and store failures stay queued.
        if self.connectivity.is_online() {
            self.try_sync("after SOS trigger");
        }

        Ok(SosOutcome::Triggered { alert_id, event_id })
    }

    /// Cancels the active SOS, resolving its alert entry with a "cancelled"
    /// note.
    pub fn cancel_sos(&mut self) -> Result<()> {
        self.resolve_active_sos("cancelled")
    }

    /// Marks the user safe: resolves the active alert and clears any running
    /// check-in deadline.
    pub fn confirm_safe(&mut self) -> Result<()> {
        self.resolve_active_sos("confirmed safe")?;
        self.check_in_deadline = None;
        Ok(())
    }

    fn resolve_active_sos(&mut self, note: &str) -> Result<()> {
        let alert_id = self.active_alert_id.take().ok_or(HavenError::NoActiveSos)?;
        self.sos_active = false;
        self.store.resolve_alert(&alert_id, note)?;
        info!(alert_id = %alert_id, note, "SOS resolved");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Position pipeline
    // ─────────────────────────────────────────────────────────────────────

    /// Feeds a new position through geofencing and (when armed) route
    /// monitoring. Returns the safety events the update produced, in order.
    pub fn update_position(&mut self, position: Position) -> Result<Vec<SafetyEvent>> {
        let mut events = Vec::new();

        let zones = self.store.list_active_zones()?;
        for transition in self.geofence.evaluate(&position, &zones) {
            match transition {
                ZoneTransition::Entered(zone) => {
                    // Inside a safe zone: relax the high-sensitivity
                    // triggers.
                    self.safe_mode = true;
                    events.push(SafetyEvent::EnteredZone(zone));
                }
                ZoneTransition::Exited(zone) => {
                    self.safe_mode = false;
                    events.push(SafetyEvent::ExitedZone(zone));
                }
            }
        }

        if let Some(deviation) =
            self.route_monitor
                .check(&position, self.deviation_threshold_meters, Utc::now())
        {
            self.record_deviation(&position, deviation.distance_meters)?;
            events.push(SafetyEvent::RouteDeviation {
                route_id: deviation.route_id,
                distance_meters: deviation.distance_meters,
            });
        }

        self.last_position = Some(position);
        Ok(events)
    }

    /// A deviation warns the contacts through the same durable path as an
    /// SOS, and leaves a check-in entry in the history.
    fn record_deviation(&mut self, position: &Position, distance_meters: f64) -> Result<()> {
        warn!(distance_meters, "Recording route deviation");

        let alert = AlertHistoryEntry {
            id: ulid::Ulid::new().to_string(),
            kind: AlertKind::CheckIn,
            created_at: Utc::now(),
            position: Some(position.clone()),
            resolved: false,
            notes: Some(format!(
                "deviated {:.0} m from the active safe route",
                distance_meters
            )),
            maps_url: Some(maps_url(position)),
            recordings: Vec::new(),
        };
        self.store.put_alert(&alert)?;

        self.sync.enqueue(
            &self.store,
            SosEventKind::LocationUpdate,
            Some(position.clone()),
            self.emergency_contacts(),
            self.user_ref(),
        )?;

        if self.connectivity.is_online() {
            self.try_sync("after deviation");
        }
        Ok(())
    }

    /// Runs a sync pass for an internal trigger. The queue is already
    /// durable, so failures are logged and left for the next pass.
    fn try_sync(&self, when: &str) {
        if let Err(err) = self.sync.sync_pending(&self.store, self.notifier.as_ref()) {
            warn!(error = %err, when, "Sync pass failed, events remain queued");
        }
    }

    /// Stops all passive monitoring immediately. No stale zone-exit or
    /// deviation event can fire afterwards.
    pub fn stop_monitoring(&mut self) {
        self.geofence.reset();
        self.route_monitor.disarm();
        self.safe_mode = false;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connectivity & sync
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Records a platform connectivity signal. An offline→online transition
    /// drains the pending queue; duplicate same-state signals do nothing.
    pub fn set_online(&mut self, online: bool) -> Result<Option<SyncReport>> {
        match self.connectivity.set_online(online) {
            Some(ConnectivityTransition::CameOnline) => {
                let report = self.sync.sync_pending(&self.store, self.notifier.as_ref())?;
                Ok(Some(report))
            }
            _ => Ok(None),
        }
    }

    /// Manually runs a sync pass ("retry now" in the UI).
    pub fn sync_now(&self) -> Result<SyncReport> {
        self.sync.sync_pending(&self.store, self.notifier.as_ref())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Location sharing
    // ─────────────────────────────────────────────────────────────────────

    /// Shares the current location: native share sheet first, durable
    /// location-update queue as the fallback when the sheet is declined or
    /// unavailable. The returned outcome is the share surface's answer.
    pub fn share_location(&mut self, position: Position) -> Result<ShareOutcome> {
        let url = maps_url(&position);
        let text = format!("Here is my live location: {url}");

        let outcome = match &self.share_surface {
            Some(surface) => surface.share(&text, &url),
            None => ShareOutcome::Unavailable,
        };

        if outcome != ShareOutcome::Accepted {
            self.sync.enqueue(
                &self.store,
                SosEventKind::LocationUpdate,
                Some(position),
                self.emergency_contacts(),
                self.user_ref(),
            )?;
            if self.connectivity.is_online() {
                self.try_sync("after share fallback");
            }
        }

        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Safe mode & trigger sensitivity
    // ─────────────────────────────────────────────────────────────────────

    /// True while the user is inside an active safe zone.
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// The user's voice-keyword setting. Safe mode and an active SOS
    /// suppress detection without touching this.
    pub fn set_voice_detection_enabled(&mut self, enabled: bool) {
        self.voice_detection_enabled = enabled;
    }

    /// Whether voice-keyword detection should currently run: the user
    /// setting, gated off inside safe zones and while an SOS is active.
    pub fn voice_detection_active(&self) -> bool {
        self.voice_detection_enabled && !self.safe_mode && !self.sos_active
    }

    // ─────────────────────────────────────────────────────────────────────
    // Check-in timer
    // ─────────────────────────────────────────────────────────────────────

    /// Starts (or restarts) a timed check-in: if the user does not confirm
    /// safety before the deadline, the client escalates.
    pub fn start_check_in(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.check_in_deadline = Some(now + duration);
    }

    /// True when a check-in deadline exists and has passed.
    pub fn check_in_due(&self, now: DateTime<Utc>) -> bool {
        self.check_in_deadline.is_some_and(|deadline| now >= deadline)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Route management
    // ─────────────────────────────────────────────────────────────────────

    pub fn begin_route(&mut self) -> Result<()> {
        self.route_monitor.begin_route()
    }

    pub fn add_waypoint(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        self.route_monitor.add_waypoint(latitude, longitude)
    }

    pub fn cancel_route(&mut self) {
        self.route_monitor.cancel_route()
    }

    /// Persists the in-progress draft as a new (inactive) route.
    pub fn save_route(&mut self, name: &str) -> Result<SafeRoute> {
        let route = self.route_monitor.finish_route(name, Utc::now())?;
        self.store.put_route(&route)?;
        Ok(route)
    }

    /// Activates a saved route and starts monitoring it. Any other active
    /// route is deactivated first.
    pub fn activate_route(&mut self, id: &str) -> Result<()> {
        let route = self.store.set_route_active(id)?;
        self.route_monitor.arm(route);
        Ok(())
    }

    /// Deactivates whatever route is active and stops monitoring. Clears a
    /// deviating state so no stale event can fire later.
    pub fn deactivate_route(&mut self) -> Result<()> {
        self.store.deactivate_routes()?;
        self.route_monitor.disarm();
        Ok(())
    }

    pub fn list_routes(&self) -> Result<Vec<SafeRoute>> {
        self.store.list_routes()
    }

    pub fn delete_route(&mut self, id: &str) -> Result<()> {
        if self
            .route_monitor
            .armed_route()
            .is_some_and(|r| r.id == id)
        {
            self.route_monitor.disarm();
        }
        self.store.delete_route(id)
    }

    pub fn is_route_armed(&self) -> bool {
        self.route_monitor.is_armed()
    }

    pub fn is_deviating(&self) -> bool {
        self.route_monitor.is_deviating()
    }

    pub fn set_deviation_threshold(&mut self, meters: f64) -> Result<()> {
        if meters <= 0.0 {
            return Err(HavenError::InvalidInput(format!(
                "deviation threshold must be positive (got {meters})"
            )));
        }
        self.deviation_threshold_meters = meters;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Zones, profile, session passthrough
    // ─────────────────────────────────────────────────────────────────────

    pub fn put_zone(&self, zone: &SafeZone) -> Result<()> {
        self.store.put_zone(zone)
    }

    pub fn delete_zone(&mut self, id: &str) -> Result<()> {
        self.store.delete_zone(id)?;
        // If we were inside the deleted zone, membership ends now rather
        // than on the next fix.
        if self.geofence.current_zone_id() == Some(id) {
            self.geofence.reset();
            self.safe_mode = false;
        }
        Ok(())
    }

    pub fn list_zones(&self) -> Result<Vec<SafeZone>> {
        self.store.list_zones()
    }

    pub fn list_alerts(&self) -> Result<Vec<AlertHistoryEntry>> {
        self.store.list_alerts()
    }

    pub fn set_profile(&mut self, profile: &UserProfile) -> Result<()> {
        self.store.put_profile(profile)?;
        self.sync.set_user_name(Some(profile.name.clone()));
        Ok(())
    }

    pub fn profile(&self) -> Result<Option<UserProfile>> {
        self.store.get_profile()
    }

    /// Caches the session for offline operation. Overwrites any previous
    /// session.
    pub fn cache_session(&self, session: &CachedSession) -> Result<()> {
        self.store.put_session(session)
    }

    pub fn cached_session(&self) -> Result<Option<CachedSession>> {
        self.store.get_session()
    }

    pub fn clear_session(&self) -> Result<()> {
        self.store.clear_session()
    }

    fn emergency_contacts(&self) -> Vec<Contact> {
        self.store
            .get_profile()
            .ok()
            .flatten()
            .map(|p| p.emergency_contacts)
            .unwrap_or_default()
    }

    fn user_ref(&self) -> Option<String> {
        self.store
            .get_profile()
            .ok()
            .flatten()
            .map(|p| p.user_id)
    }
}

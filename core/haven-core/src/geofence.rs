//! Zone membership tracking and enter/exit transition detection.
//!
//! The engine holds exactly one piece of state, the id of the zone the user
//! is currently inside, and recomputes membership on every position update.
//! Transitions fire once per physical crossing: standing still inside a zone
//! produces nothing, and a direct handoff between overlapping zones produces
//! an exit for the old zone followed by an enter for the new one in the same
//! evaluation.
//!
//! Overlap tie-break: the first active zone in slice order that contains the
//! point wins. The order is whatever the caller passes, which in practice is
//! the store's stable insertion order.

use tracing::debug;

use crate::geo::haversine_distance_meters;
use crate::types::{Position, SafeZone};

/// A single boundary crossing observed by [`GeofenceEngine::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneTransition {
    Entered(SafeZone),
    Exited(SafeZone),
}

/// Tracks which safe zone (if any) currently contains the user.
#[derive(Debug, Default)]
pub struct GeofenceEngine {
    current_zone_id: Option<String>,
}

impl GeofenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the containing zone after the last evaluation.
    pub fn current_zone_id(&self) -> Option<&str> {
        self.current_zone_id.as_deref()
    }

    /// Forgets the current membership. Called when monitoring stops so a
    /// later restart cannot emit a stale exit.
    pub fn reset(&mut self) {
        self.current_zone_id = None;
    }

    /// Evaluates zone membership for `position` and returns the transitions
    /// crossed since the previous evaluation, in chronological order.
    pub fn evaluate(&mut self, position: &Position, zones: &[SafeZone]) -> Vec<ZoneTransition> {
        let containing = zones.iter().find(|zone| {
            zone.is_active && zone_contains(zone, position)
        });

        let previous_id = self.current_zone_id.clone();
        let current_id = containing.map(|z| z.id.clone());

        if previous_id == current_id {
            return Vec::new();
        }

        let mut transitions = Vec::new();

        if let Some(prev_id) = &previous_id {
            // The previous zone may have been deleted since we entered it; in
            // that case we can only record that membership ended.
            if let Some(prev_zone) = zones.iter().find(|z| &z.id == prev_id) {
                debug!(zone = %prev_zone.name, "Exited safe zone");
                transitions.push(ZoneTransition::Exited(prev_zone.clone()));
            }
        }

        if let Some(zone) = containing {
            debug!(zone = %zone.name, "Entered safe zone");
            transitions.push(ZoneTransition::Entered(zone.clone()));
        }

        self.current_zone_id = current_id;
        transitions
    }
}

fn zone_contains(zone: &SafeZone, position: &Position) -> bool {
    haversine_distance_meters(
        position.latitude,
        position.longitude,
        zone.latitude,
        zone.longitude,
    ) <= zone.radius_meters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn zone(id: &str, lat: f64, lon: f64, radius: f64) -> SafeZone {
        SafeZone {
            id: id.to_string(),
            name: id.to_string(),
            latitude: lat,
            longitude: lon,
            radius_meters: radius,
            is_active: true,
        }
    }

    fn at(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon, Utc::now())
    }

    // ~0.001 deg latitude is ~111 m.
    const NEAR: f64 = 0.0003; // ~33 m
    const FAR: f64 = 0.01; // ~1.1 km

    #[test]
    fn test_single_crossing_emits_one_enter_one_exit() {
        let zones = vec![zone("z", 10.0, 20.0, 100.0)];
        let mut engine = GeofenceEngine::new();

        let mut events = Vec::new();
        // Approach, dwell inside, leave.
        for lat_offset in [FAR, NEAR, NEAR, NEAR, FAR, FAR] {
            events.extend(engine.evaluate(&at(10.0 + lat_offset, 20.0), &zones));
        }

        assert_eq!(
            events,
            vec![
                ZoneTransition::Entered(zones[0].clone()),
                ZoneTransition::Exited(zones[0].clone()),
            ]
        );
    }

    #[test]
    fn test_stationary_inside_emits_nothing_after_enter() {
        let zones = vec![zone("z", 10.0, 20.0, 100.0)];
        let mut engine = GeofenceEngine::new();

        assert_eq!(engine.evaluate(&at(10.0, 20.0), &zones).len(), 1);
        for _ in 0..5 {
            assert!(engine.evaluate(&at(10.0, 20.0), &zones).is_empty());
        }
    }

    #[test]
    fn test_overlap_handoff_emits_exit_then_enter() {
        // Two zones 150 m apart with 100 m radii: their coverage overlaps in
        // the middle. Walk from z1-only through the overlap into z2-only.
        let z1 = zone("z1", 0.0, 0.0, 100.0);
        let z2 = zone("z2", 0.00135, 0.0, 100.0);
        let zones = vec![z1.clone(), z2.clone()];
        let mut engine = GeofenceEngine::new();

        assert_eq!(
            engine.evaluate(&at(0.0, 0.0), &zones),
            vec![ZoneTransition::Entered(z1.clone())]
        );
        // The overlap region still resolves to z1 (first match wins).
        assert!(engine.evaluate(&at(0.000675, 0.0), &zones).is_empty());
        // Past z1's radius, inside z2 only.
        assert_eq!(
            engine.evaluate(&at(0.00135, 0.0), &zones),
            vec![
                ZoneTransition::Exited(z1),
                ZoneTransition::Entered(z2),
            ]
        );
    }

    #[test]
    fn test_inactive_zones_are_ignored() {
        let mut inactive = zone("z", 10.0, 20.0, 100.0);
        inactive.is_active = false;
        let mut engine = GeofenceEngine::new();

        assert!(engine.evaluate(&at(10.0, 20.0), &[inactive]).is_empty());
        assert!(engine.current_zone_id().is_none());
    }

    #[test]
    fn test_reset_clears_membership_without_emitting() {
        let zones = vec![zone("z", 10.0, 20.0, 100.0)];
        let mut engine = GeofenceEngine::new();
        engine.evaluate(&at(10.0, 20.0), &zones);
        assert!(engine.current_zone_id().is_some());

        engine.reset();
        assert!(engine.current_zone_id().is_none());

        // Re-entering after a reset is a fresh enter, not a stale exit.
        assert_eq!(
            engine.evaluate(&at(10.0, 20.0), &zones),
            vec![ZoneTransition::Entered(zones[0].clone())]
        );
    }

    #[test]
    fn test_zone_deleted_while_inside_ends_membership_quietly() {
        let zones = vec![zone("z", 10.0, 20.0, 100.0)];
        let mut engine = GeofenceEngine::new();
        engine.evaluate(&at(10.0, 20.0), &zones);

        // The zone list no longer contains z; membership ends with no
        // transition to report since the zone is gone.
        assert!(engine.evaluate(&at(10.0, 20.0), &[]).is_empty());
        assert!(engine.current_zone_id().is_none());
    }
}

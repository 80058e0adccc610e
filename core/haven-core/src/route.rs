//! Safe-route definition and deviation monitoring.
//!
//! A `RouteMonitor` moves through three states:
//!
//! - **Idle**: nothing tracked.
//! - **Defining**: the user is appending waypoints; nothing is persisted
//!   until [`RouteMonitor::finish_route`] succeeds.
//! - **Armed**: a saved route is being monitored. Position checks are
//!   throttled to once per five seconds of wall clock, and the deviation
//!   event fires exactly once per excursion past the threshold — re-arming
//!   happens silently when the user comes back within range.
//!
//! Distance to the route is the minimum point-to-segment distance over all
//! consecutive waypoint pairs. Fewer than two waypoints means the distance is
//! infinite, and an infinite distance is treated as "no route to deviate
//! from" rather than a deviation (the store refuses to persist such routes
//! anyway).

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{HavenError, Result};
use crate::geo::point_to_segment_distance_meters;
use crate::types::{Position, SafeRoute, Waypoint};

/// Deviation threshold applied when the caller does not supply one.
pub const DEFAULT_DEVIATION_THRESHOLD_METERS: f64 = 200.0;

/// Minimum wall-clock gap between distance recomputations while armed.
const CHECK_INTERVAL_SECS: i64 = 5;

/// Raised once per excursion beyond the deviation threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviationEvent {
    pub route_id: String,
    pub distance_meters: f64,
}

#[derive(Debug)]
enum MonitorState {
    Idle,
    Defining { draft: Vec<Waypoint> },
    Armed(ArmedState),
}

#[derive(Debug)]
struct ArmedState {
    route: SafeRoute,
    deviating: bool,
    last_checked: Option<DateTime<Utc>>,
}

/// The safe-route engine: waypoint capture plus armed deviation monitoring.
pub struct RouteMonitor {
    state: MonitorState,
    evaluations: u64,
}

impl Default for RouteMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteMonitor {
    pub fn new() -> Self {
        RouteMonitor {
            state: MonitorState::Idle,
            evaluations: 0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Defining
    // ─────────────────────────────────────────────────────────────────────

    /// Starts waypoint capture. Any in-progress draft is discarded; an armed
    /// route keeps monitoring until explicitly disarmed.
    pub fn begin_route(&mut self) -> Result<()> {
        if matches!(self.state, MonitorState::Armed(_)) {
            return Err(HavenError::InvalidInput(
                "cannot define a route while another is being monitored".to_string(),
            ));
        }
        self.state = MonitorState::Defining { draft: Vec::new() };
        Ok(())
    }

    /// Appends a waypoint to the in-progress draft.
    pub fn add_waypoint(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        match &mut self.state {
            MonitorState::Defining { draft } => {
                draft.push(Waypoint {
                    latitude,
                    longitude,
                });
                Ok(())
            }
            _ => Err(HavenError::InvalidInput(
                "no route is being defined".to_string(),
            )),
        }
    }

    /// Number of waypoints captured so far, if a draft is in progress.
    pub fn draft_len(&self) -> Option<usize> {
        match &self.state {
            MonitorState::Defining { draft } => Some(draft.len()),
            _ => None,
        }
    }

    /// Completes the draft as a new (inactive) route. Requires at least two
    /// waypoints; the caller persists the returned route.
    pub fn finish_route(&mut self, name: &str, now: DateTime<Utc>) -> Result<SafeRoute> {
        let draft = match &self.state {
            MonitorState::Defining { draft } => draft,
            _ => {
                return Err(HavenError::InvalidInput(
                    "no route is being defined".to_string(),
                ))
            }
        };
        if draft.len() < 2 {
            return Err(HavenError::InvalidInput(format!(
                "a safe route needs at least 2 waypoints (got {})",
                draft.len()
            )));
        }

        let route = SafeRoute {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            waypoints: draft.clone(),
            is_active: false,
            created_at: now,
        };
        self.state = MonitorState::Idle;
        Ok(route)
    }

    /// Discards the in-progress draft.
    pub fn cancel_route(&mut self) {
        if matches!(self.state, MonitorState::Defining { .. }) {
            self.state = MonitorState::Idle;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Armed monitoring
    // ─────────────────────────────────────────────────────────────────────

    /// Starts monitoring `route`. Replaces whatever was armed before.
    pub fn arm(&mut self, route: SafeRoute) {
        debug!(route = %route.name, "Arming safe route");
        self.state = MonitorState::Armed(ArmedState {
            route,
            deviating: false,
            last_checked: None,
        });
    }

    /// Stops monitoring. Clears the deviating flag and the throttle clock so
    /// a later arm starts fresh.
    pub fn disarm(&mut self) {
        if matches!(self.state, MonitorState::Armed(_)) {
            self.state = MonitorState::Idle;
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, MonitorState::Armed(_))
    }

    pub fn is_deviating(&self) -> bool {
        matches!(
            self.state,
            MonitorState::Armed(ArmedState {
                deviating: true,
                ..
            })
        )
    }

    pub fn armed_route(&self) -> Option<&SafeRoute> {
        match &self.state {
            MonitorState::Armed(armed) => Some(&armed.route),
            _ => None,
        }
    }

    /// How many distance recomputations have actually run. Throttled calls
    /// do not count.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations
    }

    /// Evaluates `position` against the armed route.
    ///
    /// Returns a [`DeviationEvent`] only on the transition from on-route to
    /// off-route; repeated polls while still deviating return `None`, and a
    /// distance back at or under the threshold clears the flag silently.
    /// Calls within the throttle window are dropped without recomputing.
    pub fn check(
        &mut self,
        position: &Position,
        threshold_meters: f64,
        now: DateTime<Utc>,
    ) -> Option<DeviationEvent> {
        let armed = match &mut self.state {
            MonitorState::Armed(armed) => armed,
            _ => return None,
        };

        if let Some(last) = armed.last_checked {
            if now - last < Duration::seconds(CHECK_INTERVAL_SECS) {
                return None;
            }
        }
        armed.last_checked = Some(now);
        self.evaluations += 1;

        let distance = distance_to_route(position, &armed.route.waypoints);

        // An infinite distance means the polyline is degenerate (<2
        // waypoints); that is "no route to deviate from", not a deviation.
        if distance.is_finite() && distance > threshold_meters {
            if !armed.deviating {
                armed.deviating = true;
                warn!(
                    route = %armed.route.name,
                    distance_meters = distance,
                    "Deviation from safe route detected"
                );
                return Some(DeviationEvent {
                    route_id: armed.route.id.clone(),
                    distance_meters: distance,
                });
            }
        } else if armed.deviating {
            debug!(route = %armed.route.name, "Back within safe route threshold");
            armed.deviating = false;
        }

        None
    }
}

/// Minimum distance from `position` to the polyline, in meters. Infinite for
/// degenerate polylines with fewer than two waypoints.
fn distance_to_route(position: &Position, waypoints: &[Waypoint]) -> f64 {
    if waypoints.len() < 2 {
        return f64::INFINITY;
    }

    waypoints
        .windows(2)
        .map(|pair| {
            point_to_segment_distance_meters(
                (position.latitude, position.longitude),
                (pair[0].latitude, pair[0].longitude),
                (pair[1].latitude, pair[1].longitude),
            )
        })
        .fold(f64::INFINITY, f64::min)
}

//! # haven-core
//!
//! Core library for Haven, a personal-safety application: the offline-first
//! safety-event subsystem shared by every client shell.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Clients can wrap with async if needed.
//! - **Not thread-safe**: Clients provide their own synchronization (`Mutex`, `RwLock`).
//! - **Never lose an alert**: Every SOS and location share is written to the
//!   local store before any network is touched; delivery is at-least-once.
//! - **Degrade, don't die**: A broken local database drops the session to
//!   memory-only operation and says so; it never blocks the SOS trigger.
//! - **Explicit wiring**: One [`HavenEngine`] per session, constructed with
//!   its notifier and share surface injected. No globals.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use haven_core::{HavenEngine, StorageConfig, TriggerType};
//!
//! let mut engine = HavenEngine::open(&StorageConfig::default(), Box::new(sms_notifier))?;
//! engine.set_online(true)?;
//! engine.trigger_sos(TriggerType::Button, Some(position))?;
//! ```

// Public modules
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod route;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used items at crate root
pub use connectivity::{ConnectivityMonitor, ConnectivityTransition};
pub use engine::{HavenEngine, SafetyEvent, SosOutcome};
pub use error::{HavenError, NotifyError, Result};
pub use geo::{haversine_distance_meters, point_to_segment_distance_meters, EARTH_RADIUS_METERS};
pub use geofence::{GeofenceEngine, ZoneTransition};
pub use route::{DeviationEvent, RouteMonitor, DEFAULT_DEVIATION_THRESHOLD_METERS};
pub use storage::StorageConfig;
pub use store::{SafetyStore, StoreMode};
pub use sync::{
    build_alert_message, maps_url, AlertNotifier, ShareOutcome, ShareSurface, SyncManager,
    SyncReport,
};
pub use types::*;

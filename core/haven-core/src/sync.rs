//! The offline SOS queue: enqueue, delivery, and reconciliation.
//!
//! Everything here is built around one promise: a triggered alert is never
//! lost to a dead network. `enqueue` writes to the local store and returns —
//! it does not know or care whether the device is online. `sync_pending`
//! walks the unsynced backlog and hands each event to the injected
//! [`AlertNotifier`]; an event is marked synced only after the notifier
//! reports success, so delivery is at-least-once. Duplicate outbound
//! messages are the accepted cost of that guarantee.

use std::cell::Cell;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{NotifyError, Result};
use crate::store::SafetyStore;
use crate::types::{Contact, PendingSosEvent, Position, SosEventKind};

/// Synced events retained after a successful sync pass; older ones are
/// pruned. Unsynced events are never pruned.
const SYNCED_RETENTION: usize = 100;

/// The single network side-effect the core invokes. Implementations wrap a
/// concrete transport (SMS gateway, push service, email) and own their own
/// timeout; a hung `send` must not be possible by contract.
pub trait AlertNotifier {
    fn send(
        &self,
        recipients: &[Contact],
        message: &str,
        position: Option<&Position>,
    ) -> std::result::Result<(), NotifyError>;
}

/// Best-effort native share sheet. Optional: the caller falls back to the
/// durable queue when sharing is declined or unavailable.
pub trait ShareSurface {
    fn share(&self, text: &str, url: &str) -> ShareOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Accepted,
    Declined,
    Unavailable,
}

/// Builds a human-followable maps link for a position. Pure, no network.
pub fn maps_url(position: &Position) -> String {
    format!(
        "https://www.google.com/maps?q={},{}",
        position.latitude, position.longitude
    )
}

/// Builds the outbound message for an event: what happened, who, and where
/// (as a maps link, when a position is available).
pub fn build_alert_message(
    kind: SosEventKind,
    position: Option<&Position>,
    user_name: Option<&str>,
) -> String {
    let who = user_name.unwrap_or("Your contact");
    let mut message = match kind {
        SosEventKind::Sos => format!("EMERGENCY! {who} needs help immediately."),
        SosEventKind::LocationUpdate => format!("{who} shared their live location with you."),
    };
    if let Some(position) = position {
        message.push_str(" Location: ");
        message.push_str(&maps_url(position));
    }
    message.push_str(" - sent by Haven");
    message
}

/// Result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Coordinates the durable queue with the notifier.
///
/// Holds no data of its own beyond a re-entrancy guard; the store is the
/// source of truth.
pub struct SyncManager {
    syncing: Cell<bool>,
    user_name: Option<String>,
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncManager {
    pub fn new() -> Self {
        SyncManager {
            syncing: Cell::new(false),
            user_name: None,
        }
    }

    /// Sets the display name embedded in outbound messages.
    pub fn set_user_name(&mut self, name: Option<String>) {
        self.user_name = name;
    }

    /// Durably records an event and returns its id. Local-only: succeeds
    /// with zero connectivity and never waits on the network.
    pub fn enqueue(
        &self,
        store: &SafetyStore,
        kind: SosEventKind,
        position: Option<Position>,
        contacts: Vec<Contact>,
        user_ref: Option<String>,
    ) -> Result<String> {
        let event = PendingSosEvent {
            id: ulid::Ulid::new().to_string(),
            kind,
            created_at: Utc::now(),
            position,
            contacts,
            synced: false,
            user_ref,
        };
        store.put_pending_event(&event)?;
        debug!(event_id = %event.id, kind = kind.as_str(), "Enqueued pending event");
        Ok(event.id)
    }

    /// Attempts delivery of every unsynced event, oldest first.
    ///
    /// Re-entrant-safe: a call made while a pass is already running is a
    /// no-op returning an empty report. A failed event is left unsynced for
    /// the next pass and does not stop the rest of the queue.
    pub fn sync_pending(
        &self,
        store: &SafetyStore,
        notifier: &dyn AlertNotifier,
    ) -> Result<SyncReport> {
        if self.syncing.replace(true) {
            debug!("Sync pass already running, skipping");
            return Ok(SyncReport::default());
        }

        let result = self.run_sync_pass(store, notifier);
        self.syncing.set(false);
        result
    }

    fn run_sync_pass(
        &self,
        store: &SafetyStore,
        notifier: &dyn AlertNotifier,
    ) -> Result<SyncReport> {
        let pending = store.list_unsynced_events()?;
        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };

        for event in &pending {
            let message =
                build_alert_message(event.kind, event.position.as_ref(), self.user_name.as_deref());

            match notifier.send(&event.contacts, &message, event.position.as_ref()) {
                Ok(()) => match store.mark_event_synced(&event.id) {
                    Ok(()) => report.delivered += 1,
                    Err(err) => {
                        // Delivered but not recorded: the event stays queued
                        // and the contact may hear from us twice.
                        // At-least-once. The rest of the queue still drains.
                        warn!(
                            event_id = %event.id,
                            error = %err,
                            "Delivered but could not mark synced, will retry"
                        );
                        report.failed += 1;
                    }
                },
                Err(err) => {
                    warn!(
                        event_id = %event.id,
                        error = %err,
                        "Delivery failed, event left queued for retry"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.delivered > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                "Sync pass complete"
            );
            // Housekeeping only; a failed prune never fails the pass.
            if let Err(err) = store.prune_synced_events(SYNCED_RETENTION) {
                warn!(error = %err, "Pruning synced events failed");
            }
        }

        Ok(report)
    }
}

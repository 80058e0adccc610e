//! End-to-end test of the offline emergency path: trigger with no network,
//! restart the process, come online, and confirm delivery.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::Utc;
use haven_core::{
    AlertNotifier, Contact, HavenEngine, NotifyError, Position, SafetyStore, SosOutcome,
    StorageConfig, StoreMode, TriggerType,
};

#[derive(Default)]
struct FlakyGateway {
    down: Cell<bool>,
    deliveries: RefCell<Vec<String>>,
}

/// Local handle so the foreign trait is implemented for a local type.
struct GatewayHandle(Rc<FlakyGateway>);

impl AlertNotifier for GatewayHandle {
    fn send(
        &self,
        _recipients: &[Contact],
        message: &str,
        _position: Option<&Position>,
    ) -> Result<(), NotifyError> {
        if self.0.down.get() {
            return Err(NotifyError::new("no signal"));
        }
        self.0.deliveries.borrow_mut().push(message.to_string());
        Ok(())
    }
}

fn open_engine(
    config: &StorageConfig,
    gateway: &Rc<FlakyGateway>,
) -> HavenEngine {
    let (store, mode) = SafetyStore::open_with_fallback(&config.db_path()).unwrap();
    assert_eq!(mode, StoreMode::Durable);
    HavenEngine::with_store(store, mode, Box::new(GatewayHandle(Rc::clone(gateway))))
}

#[test]
fn sos_triggered_offline_survives_restart_and_delivers_later() {
    let temp = tempfile::tempdir().unwrap();
    let config = StorageConfig::with_root(temp.path().to_path_buf());
    let gateway = Rc::new(FlakyGateway::default());
    gateway.down.set(true);

    // Session 1: offline, trigger an SOS and share a location. Both must be
    // queued durably even though nothing can be delivered.
    {
        let mut engine = open_engine(&config, &gateway);
        let outcome = engine
            .trigger_sos(
                TriggerType::Button,
                Some(Position::new(12.9716, 77.5946, Utc::now())),
            )
            .unwrap();
        assert!(matches!(outcome, SosOutcome::Triggered { .. }));

        engine
            .share_location(Position::new(12.9720, 77.5950, Utc::now()))
            .unwrap();

        assert_eq!(engine.store().list_unsynced_events().unwrap().len(), 2);
        assert!(gateway.deliveries.borrow().is_empty());
    }

    // Session 2: a fresh process reopens the same database. The queue is
    // still there; connectivity comes back and everything drains.
    {
        let mut engine = open_engine(&config, &gateway);
        assert_eq!(engine.store().list_unsynced_events().unwrap().len(), 2);

        gateway.down.set(false);
        let report = engine.set_online(true).unwrap().expect("offline->online");
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        assert!(engine.store().list_unsynced_events().unwrap().is_empty());
        assert_eq!(gateway.deliveries.borrow().len(), 2);
        // The SOS message carries a maps link for the embedded position.
        assert!(gateway.deliveries.borrow()[0].contains("google.com/maps"));
    }
}

#[test]
fn partial_gateway_recovery_retries_only_the_failures() {
    let temp = tempfile::tempdir().unwrap();
    let config = StorageConfig::with_root(temp.path().to_path_buf());
    let gateway = Rc::new(FlakyGateway::default());

    let mut engine = open_engine(&config, &gateway);
    gateway.down.set(true);

    engine
        .trigger_sos(TriggerType::Voice, Some(Position::new(1.0, 2.0, Utc::now())))
        .unwrap();

    // Gateway down during the first online transition: attempt fails, event
    // stays queued.
    let report = engine.set_online(true).unwrap().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(engine.store().list_unsynced_events().unwrap().len(), 1);

    // Manual retry after recovery delivers it; a second retry finds nothing.
    gateway.down.set(false);
    assert_eq!(engine.sync_now().unwrap().delivered, 1);
    assert_eq!(engine.sync_now().unwrap().attempted, 0);
}

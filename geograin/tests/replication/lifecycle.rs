//! Activation and deactivation of the log view.

use std::rc::Rc;
use std::time::Duration;

use geograin::replication::{AdaptorStatus, InMemoryGrainStorage, ProtocolParticipant};
use geograin::{ReplicationConfig, ReplicationError};

use super::common::{counter, init_tracing, run_local, Increment};

#[tokio::test(start_paused = true)]
async fn test_deactivate_drains_every_pending_update() {
    init_tracing();
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        storage.set_latency(Duration::from_millis(10));
        let adaptor = counter(&storage, ReplicationConfig::default());
        adaptor.activate().await.expect("activate");

        for _ in 0..3 {
            adaptor.submit(Increment(1));
        }
        let late = adaptor.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            late.submit(Increment(10));
        });

        let participant: &dyn ProtocolParticipant = &adaptor;
        participant.deactivate().await.expect("deactivate");

        assert_eq!(adaptor.status(), AdaptorStatus::Closed);
        assert!(adaptor.unconfirmed_updates().is_empty());
        assert!(adaptor.is_idle());
        let last = storage.writes().last().cloned().expect("at least one write");
        let stored: u64 = serde_json::from_slice(&last.data).expect("decode");
        assert_eq!(stored, 13, "update submitted while draining is stored too");
    })
    .await;
}

#[tokio::test]
async fn test_activation_failure_can_be_retried() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(&storage, ReplicationConfig::default());

        storage.set_unavailable(true);
        assert!(matches!(
            adaptor.activate().await,
            Err(ReplicationError::Storage(_))
        ));
        assert_eq!(adaptor.status(), AdaptorStatus::Uninitialized);

        storage.set_unavailable(false);
        adaptor.activate().await.expect("second activation");
        assert_eq!(adaptor.status(), AdaptorStatus::Ready);
    })
    .await;
}

#[tokio::test]
async fn test_reactivation_sees_drained_state() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let first = counter(&storage, ReplicationConfig::default());
        first.activate().await.expect("activate");
        first.submit(Increment(4));
        first.submit(Increment(4));
        first.deactivate().await.expect("deactivate");

        let second = counter(&storage, ReplicationConfig::default());
        second.activate().await.expect("reactivate");
        assert_eq!(second.confirmed_view(), 8);
        assert_eq!(second.confirmed_version(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_deactivate_before_activation_closes_immediately() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(&storage, ReplicationConfig::default());

        adaptor.deactivate().await.expect("deactivate");
        assert_eq!(adaptor.status(), AdaptorStatus::Closed);
        assert_eq!(storage.reads(), 0);
    })
    .await;
}

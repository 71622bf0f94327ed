//! Conflict retries against a contended store.

use std::rc::Rc;

use geograin::replication::InMemoryGrainStorage;
use geograin::{ReplicationConfig, ReplicationError, StorageError};

use super::common::{counter, init_tracing, run_local, Increment};

const CONFLICTS: u32 = 3;

#[tokio::test]
async fn test_budget_above_conflicts_converges() {
    init_tracing();
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(
            &storage,
            ReplicationConfig::builder().max_write_attempts(5).build(),
        );
        adaptor.activate().await.expect("activate");

        storage.inject_conflicts(CONFLICTS);
        adaptor.submit(Increment(2));
        adaptor.submit(Increment(3));
        adaptor
            .confirm_submitted_entries()
            .await
            .expect("converges after conflicts");

        assert_eq!(storage.write_attempts(), u64::from(CONFLICTS) + 1);
        assert!(adaptor.unconfirmed_updates().is_empty());
        assert_eq!(adaptor.confirmed_view(), 5);
        // Each injected conflict stands for a foreign write.
        assert_eq!(adaptor.confirmed_version(), u64::from(CONFLICTS) + 1);
    })
    .await;
}

#[tokio::test]
async fn test_budget_at_conflicts_gives_up_and_keeps_queue() {
    init_tracing();
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(
            &storage,
            ReplicationConfig::builder()
                .max_write_attempts(CONFLICTS)
                .build(),
        );
        adaptor.activate().await.expect("activate");

        storage.inject_conflicts(CONFLICTS);
        adaptor.submit(Increment(5));
        let result = adaptor.confirm_submitted_entries().await;

        assert_eq!(
            result,
            Err(ReplicationError::RetriesExhausted {
                attempts: CONFLICTS
            })
        );
        assert_eq!(adaptor.unconfirmed_updates(), vec![Increment(5)]);
        assert_eq!(adaptor.tentative_view(), 5);
        assert_eq!(adaptor.confirmed_view(), 0);
        assert!(storage.writes().is_empty());
        assert_eq!(adaptor.last_error(), result.err());

        adaptor
            .confirm_submitted_entries()
            .await
            .expect("next cycle retries the same updates");
        assert_eq!(adaptor.confirmed_view(), 5);
        assert!(adaptor.last_error().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_non_conflict_failure_is_not_retried() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(&storage, ReplicationConfig::default());
        adaptor.activate().await.expect("activate");

        storage.set_unavailable(true);
        adaptor.submit(Increment(1));
        let result = adaptor.synchronize_now().await;

        assert!(matches!(
            result,
            Err(ReplicationError::Storage(StorageError::Unavailable(_)))
        ));
        assert_eq!(storage.write_attempts(), 0);
        assert_eq!(adaptor.unconfirmed_updates(), vec![Increment(1)]);
    })
    .await;
}

#[tokio::test]
async fn test_two_adaptors_on_one_grain_both_land() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let left = counter(&storage, ReplicationConfig::default());
        let right = counter(&storage, ReplicationConfig::default());
        left.activate().await.expect("activate left");
        right.activate().await.expect("activate right");

        left.submit(Increment(10));
        right.submit(Increment(1));
        left.confirm_submitted_entries().await.expect("left");
        right.confirm_submitted_entries().await.expect("right");

        right.synchronize_now().await.expect("sync right");
        left.synchronize_now().await.expect("sync left");
        assert_eq!(left.confirmed_view(), 11);
        assert_eq!(right.confirmed_view(), 11);
        assert_eq!(left.confirmed_version(), right.confirmed_version());
    })
    .await;
}

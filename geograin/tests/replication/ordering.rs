//! Batching and commit order.

use std::rc::Rc;
use std::time::Duration;

use geograin::replication::{GrainStorage, InMemoryGrainStorage, LogViewAdaptor};
use geograin::worker::SingleFlightScheduler;
use geograin::{ReplicationConfig, WorkerError};

use super::common::{counter, counter_grain, init_tracing, run_local, Increment, Push};

#[tokio::test]
async fn test_five_increments_commit_as_one_batch() {
    init_tracing();
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        let adaptor = counter(&storage, ReplicationConfig::default());
        adaptor.activate().await.expect("activate");
        assert_eq!(adaptor.confirmed_version(), 0);

        for _ in 0..5 {
            adaptor.submit(Increment(1));
        }
        adaptor
            .confirm_submitted_entries()
            .await
            .expect("confirm");

        assert_eq!(adaptor.confirmed_view(), 5);
        assert_eq!(adaptor.confirmed_version(), 1);
        assert!(adaptor.unconfirmed_updates().is_empty());
        assert_eq!(adaptor.tentative_view(), 5);
        assert_eq!(storage.writes().len(), 1, "all five updates share one write");
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_updates_commit_in_submission_order() {
    init_tracing();
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        storage.set_latency(Duration::from_millis(10));
        let adaptor: LogViewAdaptor<Vec<u32>, Push> = LogViewAdaptor::new(
            counter_grain(),
            Rc::clone(&storage) as Rc<dyn GrainStorage>,
            ReplicationConfig::default(),
        );
        adaptor.activate().await.expect("activate");

        for value in 1..=3 {
            adaptor.submit(Push(value));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        for value in 4..=6 {
            adaptor.submit(Push(value));
        }
        assert_eq!(adaptor.tentative_view(), vec![1, 2, 3, 4, 5, 6]);

        adaptor
            .confirm_submitted_entries()
            .await
            .expect("confirm");

        let written: Vec<Vec<u32>> = storage
            .writes()
            .iter()
            .map(|record| serde_json::from_slice(&record.data).expect("decode"))
            .collect();
        assert_eq!(
            written,
            vec![vec![1, 2, 3], vec![1, 2, 3, 4, 5, 6]],
            "updates submitted during a flush go to the next batch, in order"
        );
        assert_eq!(adaptor.confirmed_view(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(adaptor.confirmed_version(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_hundred_submits_during_flush_cost_one_more_write() {
    run_local(async {
        let storage = Rc::new(InMemoryGrainStorage::new());
        storage.set_latency(Duration::from_millis(10));
        let adaptor = counter(&storage, ReplicationConfig::default());
        adaptor.activate().await.expect("activate");

        adaptor.submit(Increment(1));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!adaptor.is_idle());
        for _ in 0..100 {
            adaptor.submit(Increment(1));
        }
        adaptor
            .confirm_submitted_entries()
            .await
            .expect("confirm");

        assert_eq!(storage.writes().len(), 2);
        assert_eq!(adaptor.confirmed_view(), 101);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_hundred_notifies_during_cycle_run_exactly_two_cycles() {
    run_local(async {
        let runs = Rc::new(std::cell::Cell::new(0u32));
        let counted = Rc::clone(&runs);
        let scheduler: SingleFlightScheduler<WorkerError> =
            SingleFlightScheduler::new("slow", move || {
                let counted = Rc::clone(&counted);
                async move {
                    counted.set(counted.get() + 1);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }
            });

        scheduler.notify();
        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..100 {
            scheduler.notify();
        }
        scheduler.wait_for_quiescence().await;

        assert_eq!(runs.get(), 2);
        assert_eq!(scheduler.cycles_started(), 2);
        assert!(scheduler.is_idle());
    })
    .await;
}

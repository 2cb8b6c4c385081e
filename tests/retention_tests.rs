/// Integration tests for the retention window and the write path
mod common;

use chrono::{TimeZone, Utc};
use common::SCHEDULER_TEXT;
use fleet_metrics::exposition::parse_text;
use fleet_metrics::store::{
    IngestWriter, PersistOutcome, PersistRequest, QueryService, StoreManager,
};
use std::sync::Arc;

const APP: &str = "karmada-scheduler";
const POD: &str = "karmada-scheduler-6f9c";

fn snapshot_at(secs: i64) -> fleet_metrics::exposition::Snapshot {
    let time = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    parse_text(SCHEDULER_TEXT, time).unwrap()
}

#[tokio::test]
async fn test_window_never_exceeds_five_times() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(StoreManager::new(dir.path()));
    let (queue, writer) = IngestWriter::spawn(stores.clone(), 2);

    for i in 0..20 {
        queue
            .enqueue(PersistRequest {
                application: APP.to_string(),
                pod: POD.to_string(),
                snapshot: snapshot_at(i),
            })
            .await
            .unwrap();
    }
    writer.shutdown().await;

    let times = stores.distinct_times(APP, POD).await.unwrap();
    assert_eq!(times.len(), 5);

    let details = QueryService::new(stores.clone())
        .get_detail(APP, POD, "go_goroutines")
        .await
        .unwrap();
    assert_eq!(details.len(), 5);
    assert!(details.keys().all(|t| times.contains(t)));
}

#[tokio::test]
async fn test_concurrent_persists_leave_complete_rows() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Arc::new(StoreManager::new(dir.path()));

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let stores = stores.clone();
            tokio::spawn(async move { stores.persist(APP, POD, &snapshot_at(i)).await })
        })
        .collect();
    let mut stored: usize = 0;
    for task in tasks {
        // Lock contention may surface as an error; a failed persist must
        // leave nothing behind
        if let Ok(PersistOutcome::Stored { .. }) = task.await.unwrap() {
            stored += 1;
        }
    }
    assert!(stored > 0, "no concurrent persist succeeded");

    let times = stores.distinct_times(APP, POD).await.unwrap();
    assert_eq!(times.len(), stored.min(5));

    let expected = snapshot_at(0);
    let query = QueryService::new(stores.clone());
    let names = query.list_metric_names(APP, POD).await.unwrap();
    assert_eq!(names.len(), expected.families.len());
    for name in &names {
        let details = query.get_detail(APP, POD, name).await.unwrap();
        assert_eq!(details.len(), times.len(), "metric {} has a partial history", name);
        let per_snapshot = expected.families[name].samples.len();
        for (time, detail) in &details {
            assert!(times.contains(time));
            assert_eq!(
                detail.values.len(),
                per_snapshot,
                "metric {} at {} is half-written",
                name,
                time
            );
        }
    }
}

#[tokio::test]
async fn test_reopened_store_keeps_window() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stores = StoreManager::new(dir.path());
        for i in 0..7 {
            stores.persist(APP, POD, &snapshot_at(i)).await.unwrap();
        }
        stores.close().await;
    }

    let stores = StoreManager::new(dir.path());
    stores.persist(APP, POD, &snapshot_at(100)).await.unwrap();

    let times = stores.distinct_times(APP, POD).await.unwrap();
    assert_eq!(times.len(), 5);
}

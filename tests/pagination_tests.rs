mod support;

use assert_matches::assert_matches;
use async_cosmos::{Project, ScanOptions, StoreError};
use futures::{StreamExt, TryStreamExt};
use support::{FaultyStore, TestRepo, repository_over};

async fn seeded(store: FaultyStore, count: usize, scan: ScanOptions) -> TestRepo<FaultyStore> {
    let env = repository_over(store, scan).await;
    for i in 0..count {
        env.repository
            .save(Project::new(format!("project-{i}")))
            .await
            .expect("seed");
    }
    env
}

fn pages_of(page_size: u32) -> ScanOptions {
    ScanOptions {
        page_size,
        result_cap: None,
    }
}

#[tokio::test]
async fn scan_is_lazy() {
    let env = seeded(FaultyStore::new(), 3, pages_of(2)).await;
    let mut stream = env.repository.find_all();
    assert_eq!(env.store.query_calls(), 0);

    let first = stream.next().await.expect("first batch").expect("ok");
    assert_eq!(first.len(), 2);
    assert_eq!(env.store.query_calls(), 1);

    drop(stream);
    assert_eq!(env.store.query_calls(), 1);
}

#[tokio::test]
async fn mid_scan_failure_keeps_earlier_batches() {
    let env = seeded(FaultyStore::new().failing_query_call(1), 5, pages_of(2)).await;
    let mut stream = env.repository.find_all();

    let first = stream.next().await.expect("first batch");
    assert_eq!(first.expect("first page ok").len(), 2);

    let second = stream.next().await.expect("second item");
    assert_matches!(second, Err(StoreError::Status { status: 503, .. }));

    assert!(stream.next().await.is_none(), "stream ends after an error");
}

#[tokio::test]
async fn empty_pages_are_skipped() {
    let env = seeded(FaultyStore::new().with_leading_empty_pages(2), 3, pages_of(2)).await;
    let batches: Vec<Vec<Project>> = env.repository.find_all().try_collect().await.unwrap();

    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 1]);
    assert_eq!(env.store.query_calls(), 4);
}

#[tokio::test]
async fn cap_bounds_total_results() {
    let scan = ScanOptions {
        page_size: 4,
        result_cap: Some(6),
    };
    let env = seeded(FaultyStore::new(), 10, scan).await;
    let batches: Vec<Vec<Project>> = env.repository.find_all().try_collect().await.unwrap();

    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 2]);
}

#[tokio::test]
async fn every_batch_respects_page_size() {
    let env = seeded(FaultyStore::new(), 11, pages_of(3)).await;
    let batches: Vec<Vec<Project>> = env.repository.find_all().try_collect().await.unwrap();

    assert!(batches.iter().all(|batch| !batch.is_empty() && batch.len() <= 3));
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 11);
}

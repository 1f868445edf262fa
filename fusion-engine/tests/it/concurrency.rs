use std::collections::HashSet;

use fusion_core::{FusionOutcome, SourceId};
use tokio::task::JoinSet;

use crate::helper::*;

const NUM_VESSELS: i32 = 50;
const NUM_REPORTS: i64 = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_sources_and_vessels_fuse_in_parallel() {
    let helper = TestHelper::new();
    let pool = helper.pool();

    let mut sources = JoinSet::new();
    for source in ["a", "b", "c"] {
        let handle = pool.handle();
        sources.spawn(async move {
            for i in 0..NUM_REPORTS {
                for v in 0..NUM_VESSELS {
                    let r = report(257000000 + v, source, 60. + i as f64 * 0.001, 5., t(i * 60));
                    handle.dispatch(r).await.unwrap();
                }
            }
        });
    }
    while let Some(res) = sources.join_next().await {
        res.unwrap();
    }

    let engine = pool.engine().clone();
    pool.shutdown().await.unwrap();

    assert_eq!(engine.num_vessels(), NUM_VESSELS as usize);

    let all_sources: HashSet<SourceId> = ["a", "b", "c"].into_iter().map(SourceId::from).collect();
    for v in 0..NUM_VESSELS {
        let snapshot = engine.snapshot(&key(257000000 + v));

        assert_eq!(snapshot.len(), NUM_REPORTS as usize);
        assert!(snapshot.is_sorted_by_key(|f| f.timestamp));
        for fix in snapshot {
            assert_eq!(
                fix.contributing_sources.into_iter().collect::<HashSet<_>>(),
                all_sources
            );
        }
    }

    let stats = engine.stats();
    assert_eq!(stats.accepted, (NUM_VESSELS as u64) * NUM_REPORTS as u64);
    assert_eq!(stats.deduplicated, 2 * (NUM_VESSELS as u64) * NUM_REPORTS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_from_many_tasks_returns_every_outcome() {
    let helper = TestHelper::new();
    let pool = helper.pool();

    let mut tasks = JoinSet::new();
    for v in 0..NUM_VESSELS {
        let handle = pool.handle();
        tasks.spawn(async move {
            handle
                .submit(report(257000000 + v, "a", 60., 5., t(0)))
                .await
                .unwrap()
        });
    }

    let mut accepted = 0;
    while let Some(res) = tasks.join_next().await {
        if let FusionOutcome::Accepted(_) = res.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, NUM_VESSELS);
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_runs_alongside_ingestion() {
    let helper = TestHelper::new();
    let engine = helper.engine.clone();

    for v in 0..NUM_VESSELS {
        engine.ingest(report(311000000 + v, "a", 60., 5., t(0)));
    }

    let writer = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..NUM_REPORTS {
                let latitude = 60. + i as f64 * 0.001;
                engine.ingest(report(257123450, "a", latitude, 5., t(50_000 + i * 60)));
            }
        })
    };
    let evictor = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut evicted = 0;
            for _ in 0..NUM_REPORTS {
                evicted += engine.evict_stale(t(50_000));
            }
            evicted
        })
    };

    writer.await.unwrap();
    let evicted = evictor.await.unwrap();

    assert_eq!(evicted, NUM_VESSELS as usize);
    assert_eq!(engine.num_vessels(), 1);
    assert_eq!(
        engine.snapshot(&key(257123450)).len(),
        NUM_REPORTS as usize
    );
}

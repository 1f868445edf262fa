use chrono::Duration;
use fusion_core::{
    AnomalyFlag, FusionConfig, FusionOutcome, PositionReport, RejectReason, SourceId, VesselKey,
};
use rand::seq::SliceRandom;

use crate::helper::*;

#[test]
fn test_two_agreeing_sources_merge_into_one_fix() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let a = report(257123450, "a", 25.80, 56.00, t(100)).with_speed(12.0);
    let b = report(257123450, "b", 25.801, 56.001, t(101)).with_speed(12.1);

    let first = engine.ingest(a);
    let second = engine.ingest(b);

    let single = first.fix().unwrap().confidence;
    let merged = second.fix().unwrap();

    assert!(matches!(second, FusionOutcome::Deduplicated { updated: Some(_) }));
    assert_eq!(
        merged.contributing_sources,
        [SourceId::from("a"), SourceId::from("b")].into()
    );
    assert!(merged.confidence > single);
    assert!(merged.confidence >= engine.config().confidence.single_source_ceiling);
    assert!((merged.speed.unwrap() - 12.05).abs() < 1e-9);

    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot, vec![merged.clone()]);
    assert!(snapshot[0].timestamp >= t(100) && snapshot[0].timestamp <= t(101));
}

#[test]
fn test_implausible_jump_is_rejected_and_never_stored() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 10., 10., t(0)));
    let outcome = engine.ingest(report(257123450, "a", 20., 20., t(60)));

    match outcome {
        FusionOutcome::Rejected(RejectReason::ImplausibleMotion { knots }) => {
            assert!(knots > 600.0, "{knots}")
        }
        other => panic!("expected implausible motion, got {other:?}"),
    }

    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].timestamp, t(0));
    assert_eq!(engine.stats().rejected_implausible, 1);
}

#[test]
fn test_jumps_inside_and_after_the_duplicate_window_are_rejected() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 10., 10., t(0)));
    let inside = engine.ingest(report(257123450, "b", 20., 20., t(10)));
    let after = engine.ingest(report(257123450, "c", 40., 40., t(100)));

    for outcome in [inside, after] {
        assert!(matches!(
            outcome,
            FusionOutcome::Rejected(RejectReason::ImplausibleMotion { .. })
        ));
    }

    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].latitude, 10.);
    assert!(!snapshot[0].disputed);
    assert_eq!(engine.stats().disputes, 0);
}

#[test]
fn test_reachable_disagreement_inside_the_window_is_disputed() {
    let mut config = FusionConfig::default();
    config.duplicate.window = std::time::Duration::from_secs(120);
    let helper = TestHelper::with_config(config);
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    // 0.6nm in 90s
    let outcome = engine.ingest(report(257123450, "b", 60.01, 5., t(90)));

    assert!(outcome.fix().unwrap().disputed);
    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|f| f.disputed));
}

#[test]
fn test_report_after_disputed_fixes_must_be_reachable_from_one_of_them() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    let disputed = engine.ingest(report(257123450, "b", 60.05, 5., t(0)));
    assert!(disputed.fix().unwrap().disputed);

    let jump = engine.ingest(report(257123450, "c", 70., 5., t(60)));
    assert!(matches!(
        jump,
        FusionOutcome::Rejected(RejectReason::ImplausibleMotion { .. })
    ));

    let follows_b = engine.ingest(report(257123450, "b", 60.05, 5., t(60)));
    assert!(follows_b.is_accepted());

    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.iter().all(|f| f.latitude < 61.));
}

#[test]
fn test_implausible_late_arrival_is_checked_against_later_fix() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 10., 10., t(0)));
    engine.ingest(report(257123450, "a", 10.1, 10., t(600)));

    let outcome = engine.ingest(report(257123450, "b", 10., 10., t(540)).received(t(700)));

    assert!(outcome.is_rejected());
    assert_eq!(engine.snapshot(&key(257123450)).len(), 2);
}

#[test]
fn test_silent_vessel_is_evicted_and_snapshot_is_empty() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(311000001, "a", 60., 5., t(0) + Duration::hours(2)));

    let threshold = Duration::hours(12);

    assert_eq!(engine.evict_stale(t(0) + threshold), 0);
    assert_eq!(engine.evict_stale(t(0) + threshold + Duration::seconds(1)), 1);

    assert!(engine.snapshot(&key(257123450)).is_empty());
    assert!(engine.state(&key(257123450)).is_none());
    assert_eq!(engine.snapshot(&key(311000001)).len(), 1);
}

#[test]
fn test_trajectory_stays_ordered_regardless_of_arrival_order() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let mut reports: Vec<PositionReport> = (0..100)
        .map(|i| {
            report(257123450, "a", 60. + i as f64 * 0.001, 5., t(i * 60)).received(t(6_000 + i))
        })
        .collect();
    reports.shuffle(&mut rand::rng());

    for r in reports {
        assert!(engine.ingest(r).is_accepted());
    }

    let snapshot = engine.snapshot(&key(257123450));
    assert_eq!(snapshot.len(), 100);
    assert!(snapshot.is_sorted_by_key(|f| f.timestamp));
}

#[test]
fn test_reingesting_same_report_is_idempotent() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let reports: Vec<_> = (0..5)
        .map(|i| report(257123450, "a", 60. + i as f64 * 0.001, 5., t(i * 60)))
        .collect();

    for r in reports.iter().cloned() {
        engine.ingest(r);
    }
    let before = engine.snapshot(&key(257123450));

    for r in reports {
        assert_eq!(
            engine.ingest(r),
            FusionOutcome::Deduplicated { updated: None }
        );
    }

    assert_eq!(engine.snapshot(&key(257123450)), before);
    assert_eq!(engine.stats().deduplicated, 5);
}

#[test]
fn test_third_source_raises_confidence_further() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    let two = engine.ingest(report(257123450, "b", 60., 5.0001, t(2)));
    let three = engine.ingest(report(257123450, "c", 60.0001, 5., t(4)));

    let two = two.fix().unwrap().confidence;
    let three = three.fix().unwrap();

    assert!(three.confidence > two);
    assert_eq!(three.contributing_sources.len(), 3);
    assert!(three.confidence <= 1.0);
}

#[test]
fn test_malformed_identifier_gets_its_own_vessel() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let malformed = PositionReport::test_new("2571234", "a", 60., 5., t(0));
    engine.ingest(malformed);
    engine.ingest(report(257123450, "a", 61., 5., t(0)));

    let synthetic = VesselKey::Synthetic {
        source: "a".into(),
        raw: "2571234".into(),
    };

    assert_eq!(engine.snapshot(&synthetic).len(), 1);
    assert_eq!(engine.snapshot(&key(257123450)).len(), 1);
    assert_eq!(engine.num_vessels(), 2);
}

#[test]
fn test_resuming_after_long_gap_flags_prolonged_silence() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(257123450, "a", 60.01, 5., t(0) + Duration::hours(7)));

    let state = engine.state(&key(257123450)).unwrap();
    assert!(state.anomalies.contains(&AnomalyFlag::ProlongedSilence));

    let updates = engine.updates(&key(257123450));
    assert!(updates[0].anomalies.is_empty());
    assert!(updates[1].anomalies.contains(&AnomalyFlag::ProlongedSilence));
}

#[test]
fn test_report_without_observation_time_uses_reception_time() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let report = report(257123450, "a", 60., 5., t(0))
        .received(t(10))
        .without_observed_at();

    let fix = engine.ingest(report).fix().cloned().unwrap();

    assert_eq!(fix.timestamp, t(10));
    assert!(fix.observation_lag.is_none());
    assert!(fix.confidence < engine.config().confidence.single_source_ceiling);
}

#[test]
fn test_active_vessels_are_listed_by_latest_event() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(311000001, "a", 60., 5., t(3_600)));

    assert_eq!(engine.list_active_vessels(t(1_800)), vec![key(311000001)]);
    assert_eq!(engine.list_active_vessels(t(0)).len(), 2);
}

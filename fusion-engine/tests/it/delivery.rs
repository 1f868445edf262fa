use std::collections::BTreeSet;

use chrono::Duration;
use fusion_core::AnomalyFlag;
use rand::seq::SliceRandom;

use crate::helper::*;

#[test]
fn test_in_order_fixes_are_delivered_exactly_once_in_order() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    for i in 0..10 {
        engine.ingest(report(257123450, "a", 60. + i as f64 * 0.001, 5., t(i * 60)));
    }

    let confirmed: Vec<_> = helper
        .delivered()
        .into_iter()
        .map(|u| u.fix.timestamp)
        .collect();
    assert_eq!(confirmed, (0..9).map(|i| t(i * 60)).collect::<Vec<_>>());

    engine.evict_stale(t(9 * 60) + Duration::hours(13));

    let flushed: Vec<_> = helper.delivered().into_iter().map(|u| u.fix.timestamp).collect();
    assert_eq!(flushed, vec![t(9 * 60)]);
}

#[test]
fn test_outbound_order_is_non_decreasing_for_shuffled_input() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    let mut reports: Vec<_> = (0..200)
        .map(|i| {
            report(257123450, "a", 60. + i as f64 * 0.001, 5., t(i * 60)).received(t(20_000))
        })
        .collect();
    reports.shuffle(&mut rand::rng());

    for r in reports {
        engine.ingest(r);
    }
    engine.evict_stale(t(20_000) + Duration::hours(13));

    let (revisions, ordered): (Vec<_>, Vec<_>) =
        helper.delivered().into_iter().partition(|u| u.revision);
    assert!(!ordered.is_empty());
    assert!(ordered.is_sorted_by_key(|u| u.fix.timestamp));

    let timestamps: BTreeSet<_> = ordered
        .iter()
        .chain(&revisions)
        .map(|u| u.fix.timestamp)
        .collect();
    assert_eq!(timestamps.len(), 200);
    assert_eq!(engine.stats().accepted, 200);
}

#[test]
fn test_corroboration_before_confirmation_is_delivered_merged() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(257123450, "b", 60., 5., t(1)));
    engine.ingest(report(257123450, "a", 60.01, 5., t(300)));

    let delivered = helper.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].fix.contributing_sources.len(), 2);
    assert_eq!(engine.stats().late_revisions, 0);
}

#[test]
fn test_corroboration_after_confirmation_is_delivered_as_revision() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(257123450, "a", 60.01, 5., t(300)));
    assert_eq!(helper.delivered().len(), 1);

    engine.ingest(report(257123450, "b", 60., 5., t(1)).received(t(320)));

    let delivered = helper.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].revision);
    assert_eq!(delivered[0].fix.timestamp, t(0));
    assert_eq!(delivered[0].fix.contributing_sources.len(), 2);
    assert_eq!(engine.stats().late_revisions, 1);
}

#[test]
fn test_late_fix_behind_delivered_ones_reaches_the_sink() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(257123450, "a", 60.01, 5., t(100)));
    engine.ingest(report(257123450, "a", 60.03, 5., t(300)));

    let delivered: Vec<_> = helper.delivered().iter().map(|u| u.fix.timestamp).collect();
    assert_eq!(delivered, vec![t(0), t(100)]);

    let late = engine.ingest(report(257123450, "b", 60.005, 5., t(50)).received(t(310)));
    assert!(late.is_accepted());

    let revisions = helper.delivered();
    assert_eq!(revisions.len(), 1);
    assert!(revisions[0].revision);
    assert_eq!(revisions[0].fix.timestamp, t(50));

    engine.evict_stale(t(300) + Duration::hours(13));

    let flushed: Vec<_> = helper.delivered().into_iter().map(|u| u.fix.timestamp).collect();
    assert_eq!(flushed, vec![t(300)]);
}

#[test]
fn test_outbound_updates_carry_anomaly_flags() {
    let helper = TestHelper::new();
    let engine = &helper.engine;

    engine.ingest(report(257123450, "a", 60., 5., t(0)));
    engine.ingest(report(257123450, "a", 60.01, 5., t(0) + Duration::hours(7)));
    engine.ingest(report(257123450, "a", 60.02, 5., t(0) + Duration::hours(8)));

    let delivered = helper.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered[0].anomalies.is_empty());
    assert!(delivered[1].anomalies.contains(&AnomalyFlag::ProlongedSilence));
}

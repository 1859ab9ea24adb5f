// tests/coordinator_cycle.rs
//
// Full-cycle behavior of the coordinator against recording fakes.

mod common;

use chrono::Duration;
use common::{date, location, now, Harness};
use geohash_alarm::fetch::geohash::DayHash;
use geohash_alarm::matcher::BatchKind;
use geohash_alarm::scheduler::{Schedule, TimerKey};
use geohash_alarm::{CycleState, StartCause, Trigger, Variant};

fn sample_locations() -> Vec<geohash_alarm::KnownLocation> {
    vec![
        location("office", 37.4220, -122.0841, 2_000.0),
        location("cafe", 37.4300, -122.0900, 5_000.0),
        location("london", 51.5080, -0.1280, 1_000.0),
        location("nowhere", -33.9, 151.2, 100.0),
    ]
}

#[test]
fn start_primary_secondary_done() {
    let mut h = Harness::new(sample_locations());

    let s = h.handle(Trigger::Start(StartCause::Manual), now());
    assert_eq!(s, CycleState::AwaitingPrimary);
    let primary = h.fetcher.last();
    assert_eq!(primary.variant, Variant::Primary);
    assert_eq!(primary.date, date(2024, 6, 5));
    assert_eq!(*h.sink.progress.lock(), Some((date(2024, 6, 5), Variant::Primary)));

    let point_a = h.succeed(37.4211, -122.0841, now());
    assert_eq!(h.coordinator.state(), CycleState::AwaitingSecondary);
    let secondary = h.fetcher.last();
    assert_eq!(secondary.variant, Variant::Secondary);
    assert_eq!(secondary.date, primary.date);
    assert_ne!(secondary.request_id, primary.request_id);

    let point_b = h.succeed(51.5072, -0.1276, now());
    assert_eq!(h.coordinator.state(), CycleState::Done);
    assert_eq!(h.fetcher.count(), 2);
    assert!(h.coordinator.outstanding().is_none());
    assert!(h.sink.progress.lock().is_none());

    // matcher ran exactly once, with both points
    assert_eq!(h.locations.calls(), 1);
    let emitted = h.sink.emitted.lock();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].kind, BatchKind::Regular);
    assert_eq!(emitted[0].best.hash_point, point_a);
    assert_eq!(emitted[0].best.location.id, "office");
    assert_eq!(emitted[0].additional_count, 1);
    assert_eq!(emitted[1].kind, BatchKind::Global);
    assert_eq!(emitted[1].best.hash_point, point_b);
    assert_eq!(emitted[1].best.location.id, "london");
    assert_eq!(emitted[1].additional_count, 0);

    let outcome = h.coordinator.last_outcome().expect("outcome kept");
    assert_eq!(outcome.regular.len(), 2);
    assert_eq!(outcome.global.len(), 1);
}

#[test]
fn before_cutoff_fetches_previous_date() {
    let mut h = Harness::new(vec![]);
    // 09:00 EDT
    let early = now() - Duration::hours(1);
    h.handle(Trigger::Start(StartCause::Manual), early);
    assert_eq!(h.fetcher.last().date, date(2024, 6, 4));
    assert_eq!(h.coordinator.cycle_date(), Some(date(2024, 6, 4)));
}

#[test]
fn no_known_locations_still_completes() {
    let mut h = Harness::new(vec![]);
    h.handle(Trigger::Start(StartCause::Manual), now());
    h.succeed(10.0, 10.0, now());
    h.succeed(20.0, 20.0, now());
    assert_eq!(h.coordinator.state(), CycleState::Done);
    assert!(h.sink.emitted.lock().is_empty());
    assert_eq!(h.sink.cleared_matches.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn store_failure_still_completes_without_alerts() {
    let mut h = Harness::new(sample_locations());
    *h.locations.fail.lock() = true;
    h.handle(Trigger::Start(StartCause::Manual), now());
    h.succeed(37.4211, -122.0841, now());
    h.succeed(51.5072, -0.1276, now());
    assert_eq!(h.coordinator.state(), CycleState::Done);
    assert!(h.sink.emitted.lock().is_empty());
}

#[test]
fn only_global_matches_emit_one_batch() {
    let mut h = Harness::new(sample_locations());
    h.handle(Trigger::Start(StartCause::Manual), now());
    h.succeed(0.5, 0.5, now());
    h.succeed(51.5072, -0.1276, now());
    let emitted = h.sink.emitted.lock();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].kind, BatchKind::Global);
}

#[test]
fn daily_start_repins_the_daily_alarm() {
    let mut h = Harness::new(vec![]);
    h.coordinator.enable(now());
    h.handle(Trigger::Start(StartCause::DailyAlarm), now());
    let next = h.coordinator.scheduler().daily_at().unwrap();
    assert_eq!(next, now() + Duration::hours(23) + Duration::minutes(30));
    assert!(matches!(
        h.timers.get(TimerKey::Daily),
        Some(Schedule::Repeating { first, .. }) if first == next
    ));

    // Manual kicks leave the daily alarm alone
    let before = h.timers.registrations.lock().len();
    h.handle(Trigger::Start(StartCause::Manual), now());
    assert_eq!(h.timers.registrations.lock().len(), before);
}

#[test]
fn done_cycle_restarts_on_next_start() {
    let mut h = Harness::new(vec![]);
    h.handle(Trigger::Start(StartCause::Manual), now());
    h.succeed(1.0, 1.0, now());
    h.succeed(2.0, 2.0, now());
    assert_eq!(h.coordinator.state(), CycleState::Done);

    let tomorrow = now() + Duration::days(1);
    h.handle(Trigger::Start(StartCause::DailyAlarm), tomorrow);
    assert_eq!(h.coordinator.state(), CycleState::AwaitingPrimary);
    assert_eq!(h.fetcher.last().date, date(2024, 6, 6));
}

#[test]
fn request_ids_are_unique_across_cycles() {
    let mut h = Harness::new(vec![]);
    for _ in 0..3 {
        h.handle(Trigger::Start(StartCause::Manual), now());
        h.succeed(1.0, 1.0, now());
        h.succeed(2.0, 2.0, now());
    }
    let mut ids: Vec<_> = h.fetcher.submitted.lock().iter().map(|r| r.request_id).collect();
    let n = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), n);
}

fn day_fractions(d: chrono::NaiveDate) -> DayHash {
    DayHash {
        date: d,
        west: Some((0.5, 0.5)),
        east: Some((0.25, 0.75)),
    }
}

#[test]
fn locations_in_other_graticules_get_their_own_regular_point() {
    let mut h = Harness::new(vec![
        location("sf", 37.501, -122.501, 1_000.0),
        location("berlin", 52.251, 13.751, 1_000.0),
        location("sydney", -33.9, 151.2, 100.0),
    ]);
    h.handle(Trigger::Start(StartCause::Manual), now());
    let home = h.succeed_with_day(37.5, -122.5, day_fractions(date(2024, 6, 5)), now());
    h.succeed(0.0, 0.0, now());
    assert_eq!(h.coordinator.state(), CycleState::Done);

    let outcome = h.coordinator.last_outcome().expect("outcome kept");
    assert_eq!(outcome.regular.len(), 2);
    let sf = outcome.regular.iter().find(|m| m.location.id == "sf").unwrap();
    assert_eq!(sf.hash_point, home);
    let berlin = outcome.regular.iter().find(|m| m.location.id == "berlin").unwrap();
    assert_eq!(berlin.hash_point.latitude, 52.25);
    assert_eq!(berlin.hash_point.longitude, 13.75);
    assert_eq!(berlin.hash_point.date, date(2024, 6, 5));

    let emitted = h.sink.emitted.lock();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].kind, BatchKind::Regular);
    assert_eq!(emitted[0].additional_count, 1);
}

#[test]
fn fractions_for_another_date_are_ignored() {
    let mut h = Harness::new(vec![
        location("sf", 37.501, -122.501, 1_000.0),
        location("berlin", 52.251, 13.751, 1_000.0),
    ]);
    h.handle(Trigger::Start(StartCause::Manual), now());
    h.succeed_with_day(37.5, -122.5, day_fractions(date(2024, 6, 4)), now());
    h.succeed(0.0, 0.0, now());

    let outcome = h.coordinator.last_outcome().expect("outcome kept");
    assert_eq!(outcome.regular.len(), 1);
    assert_eq!(outcome.regular[0].location.id, "sf");
}

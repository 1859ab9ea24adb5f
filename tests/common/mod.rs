// tests/common/mod.rs
//
// Recording fakes for every collaborator the coordinator talks to, plus a
// harness that wires them together.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

use geohash_alarm::fetch::geohash::DayHash;
use geohash_alarm::fetch::{FetchCollaborator, RequestId};
use geohash_alarm::matcher::KnownLocationStore;
use geohash_alarm::notify::AlertSink;
use geohash_alarm::scheduler::{ConnectivityMonitor, Schedule, TimerFacility, TimerKey};
use geohash_alarm::{
    AlarmScheduler, CycleState, FetchCoordinator, FetchRequest, FetchResult, HashPoint,
    KnownLocation, MatchBatch, ResultCode, StockDateCalculator, Trigger, Variant,
};

#[derive(Default)]
pub struct RecordingTimers {
    pub live: Mutex<HashMap<TimerKey, Schedule>>,
    pub registrations: Mutex<Vec<(TimerKey, Schedule)>>,
}

impl RecordingTimers {
    pub fn get(&self, key: TimerKey) -> Option<Schedule> {
        self.live.lock().get(&key).copied()
    }
}

impl TimerFacility for RecordingTimers {
    fn register(&self, key: TimerKey, schedule: Schedule) {
        self.live.lock().insert(key, schedule);
        self.registrations.lock().push((key, schedule));
    }

    fn cancel(&self, key: TimerKey) {
        self.live.lock().remove(&key);
    }
}

#[derive(Default)]
pub struct RecordingConnectivity {
    pub enabled: Mutex<bool>,
}

impl RecordingConnectivity {
    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }
}

impl ConnectivityMonitor for RecordingConnectivity {
    fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock() = enabled;
    }
}

#[derive(Default)]
pub struct RecordingFetcher {
    pub submitted: Mutex<Vec<FetchRequest>>,
    pub aborted: Mutex<Vec<RequestId>>,
}

impl RecordingFetcher {
    pub fn last(&self) -> FetchRequest {
        self.submitted
            .lock()
            .last()
            .cloned()
            .expect("no request submitted")
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().len()
    }
}

impl FetchCollaborator for RecordingFetcher {
    fn submit(&self, request: FetchRequest) {
        self.submitted.lock().push(request);
    }

    fn abort(&self, request_id: RequestId) {
        self.aborted.lock().push(request_id);
    }
}

#[derive(Default)]
pub struct RecordingLocations {
    pub locations: Mutex<Vec<KnownLocation>>,
    pub fail: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl RecordingLocations {
    pub fn with(locations: Vec<KnownLocation>) -> Self {
        Self {
            locations: Mutex::new(locations),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KnownLocationStore for RecordingLocations {
    fn known_locations(&self) -> anyhow::Result<Vec<KnownLocation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock() {
            anyhow::bail!("store offline");
        }
        Ok(self.locations.lock().clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub emitted: Mutex<Vec<MatchBatch>>,
    pub progress: Mutex<Option<(NaiveDate, Variant)>>,
    pub cleared_matches: AtomicUsize,
}

impl AlertSink for RecordingSink {
    fn in_progress(&self, date: NaiveDate, variant: Variant) {
        *self.progress.lock() = Some((date, variant));
    }

    fn clear_in_progress(&self) {
        *self.progress.lock() = None;
    }

    fn clear_matches(&self) {
        self.cleared_matches.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, batch: MatchBatch) {
        self.emitted.lock().push(batch);
    }
}

pub struct Harness {
    pub coordinator: FetchCoordinator,
    pub timers: Arc<RecordingTimers>,
    pub conn: Arc<RecordingConnectivity>,
    pub fetcher: Arc<RecordingFetcher>,
    pub locations: Arc<RecordingLocations>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(locations: Vec<KnownLocation>) -> Self {
        let calc = StockDateCalculator::default();
        let timers = Arc::new(RecordingTimers::default());
        let conn = Arc::new(RecordingConnectivity::default());
        let fetcher = Arc::new(RecordingFetcher::default());
        let locations = Arc::new(RecordingLocations::with(locations));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = AlarmScheduler::new(timers.clone(), conn.clone(), calc);
        let coordinator = FetchCoordinator::new(
            calc,
            scheduler,
            fetcher.clone(),
            locations.clone(),
            sink.clone(),
        );
        Self {
            coordinator,
            timers,
            conn,
            fetcher,
            locations,
            sink,
        }
    }

    pub fn handle(&mut self, trigger: Trigger, now: DateTime<Utc>) -> CycleState {
        let state = self.coordinator.handle(trigger, now);
        self.assert_exclusive();
        state
    }

    /// Answer the most recent request with a point.
    pub fn succeed(&mut self, lat: f64, lon: f64, now: DateTime<Utc>) -> HashPoint {
        let req = self.fetcher.last();
        let p = point(&req, lat, lon);
        self.handle(
            Trigger::FetchResultArrived(FetchResult::success(&req, p)),
            now,
        );
        p
    }

    /// Answer the Primary request with a point and the day's fractions.
    pub fn succeed_with_day(&mut self, lat: f64, lon: f64, day: DayHash, now: DateTime<Utc>) -> HashPoint {
        let req = self.fetcher.last();
        let p = point(&req, lat, lon);
        self.handle(
            Trigger::FetchResultArrived(FetchResult::success(&req, p).with_day_hash(day)),
            now,
        );
        p
    }

    /// Answer the most recent request with a non-success code.
    pub fn fail_with(&mut self, code: ResultCode, now: DateTime<Utc>) -> CycleState {
        let req = self.fetcher.last();
        self.handle(
            Trigger::FetchResultArrived(FetchResult::failure(&req, code)),
            now,
        )
    }

    /// Retry alarm and connectivity listener are never both on.
    pub fn assert_exclusive(&self) {
        let retry = self.timers.get(TimerKey::Retry).is_some();
        assert!(
            !(retry && self.conn.is_enabled()),
            "retry alarm and connectivity listener both active"
        );
    }
}

pub fn point(req: &FetchRequest, lat: f64, lon: f64) -> HashPoint {
    HashPoint {
        date: req.date,
        variant: req.variant,
        latitude: lat,
        longitude: lon,
    }
}

pub fn location(id: &str, lat: f64, lon: f64, radius: f64) -> KnownLocation {
    KnownLocation {
        id: id.into(),
        name: id.to_uppercase(),
        latitude: lat,
        longitude: lon,
        proximity_radius: radius,
    }
}

/// Wednesday 2024-06-05, 10:00 EDT: after the cutoff.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 5, 14, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

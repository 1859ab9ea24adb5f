//! # Fetch Coordinator
//! State machine behind the stock alarm.
//!
//! A cycle fetches the Primary (regular) hash point, then the Secondary
//! (global) one, for the most recent date whose opening should exist, and
//! finally matches both against the known locations. Fetch problems never
//! escape: `NotPostedYet` snoozes on the retry alarm, `NoConnection` waits
//! on the connectivity listener, `NetworkError` and malformed results end
//! the cycle in `Failed` until the next daily alarm.
//!
//! All triggers are handled one at a time by the worker, so nothing here
//! needs a lock. Exactly one request id is awaited at a time; results for
//! any other id are stale and ignored.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::fetch::geohash::DayHash;
use crate::fetch::{
    FetchCollaborator, FetchRequest, FetchResult, HashPoint, RequestFlags, RequestId, ResultCode,
    Variant,
};
use crate::matcher::{KnownLocationMatcher, KnownLocationStore, MatchOutcome};
use crate::notify::AlertSink;
use crate::scheduler::AlarmScheduler;
use crate::state::CoordinatorSnapshot;
use crate::stock_date::StockDateCalculator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    AwaitingPrimary,
    AwaitingSecondary,
    WaitingForConnectivity,
    Snoozed,
    Done,
    Failed,
}

impl CycleState {
    /// States a retry or connectivity signal may (re)start a cycle from.
    pub fn accepts_remedy(&self) -> bool {
        matches!(
            self,
            CycleState::Idle | CycleState::Snoozed | CycleState::WaitingForConnectivity
        )
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, CycleState::AwaitingPrimary | CycleState::AwaitingSecondary)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCause {
    DailyAlarm,
    Manual,
    Boot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Start(StartCause),
    RetryFire,
    ConnectivityRestored,
    FetchResultArrived(FetchResult),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Start(_) => "start",
            Trigger::RetryFire => "retry_fire",
            Trigger::ConnectivityRestored => "connectivity_restored",
            Trigger::FetchResultArrived(_) => "fetch_result",
        }
    }
}

pub struct FetchCoordinator {
    calc: StockDateCalculator,
    scheduler: AlarmScheduler,
    fetcher: Arc<dyn FetchCollaborator>,
    locations: Arc<dyn KnownLocationStore>,
    sink: Arc<dyn AlertSink>,
    matcher: KnownLocationMatcher,
    state: CycleState,
    outstanding: Option<FetchRequest>,
    cycle_date: Option<NaiveDate>,
    regular: Option<HashPoint>,
    /// Fractions from the Primary result, for per-location regular points.
    day_hash: Option<DayHash>,
    last_outcome: Option<MatchOutcome>,
    next_id: u64,
}

impl FetchCoordinator {
    pub fn new(
        calc: StockDateCalculator,
        scheduler: AlarmScheduler,
        fetcher: Arc<dyn FetchCollaborator>,
        locations: Arc<dyn KnownLocationStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            calc,
            scheduler,
            fetcher,
            locations,
            sink,
            matcher: KnownLocationMatcher,
            state: CycleState::Idle,
            outstanding: None,
            cycle_date: None,
            regular: None,
            day_hash: None,
            last_outcome: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn outstanding(&self) -> Option<&FetchRequest> {
        self.outstanding.as_ref()
    }

    pub fn cycle_date(&self) -> Option<NaiveDate> {
        self.cycle_date
    }

    pub fn scheduler(&self) -> &AlarmScheduler {
        &self.scheduler
    }

    /// Matches computed by the last cycle that reached `Done`.
    pub fn last_outcome(&self) -> Option<&MatchOutcome> {
        self.last_outcome.as_ref()
    }

    /// Turn the daily alarm on.
    pub fn enable(&mut self, now: DateTime<Utc>) {
        self.scheduler.enable_daily(now);
    }

    /// Turn everything off: alarms, listener, in-flight request.
    pub fn disable(&mut self) {
        self.scheduler.disable_all();
        self.abort_outstanding();
        self.sink.clear_in_progress();
        self.regular = None;
        self.day_hash = None;
        self.transition(CycleState::Idle, "alarm_off");
    }

    pub fn handle(&mut self, trigger: Trigger, now: DateTime<Utc>) -> CycleState {
        let name = trigger.name();
        match trigger {
            Trigger::Start(cause) => {
                self.scheduler.cancel_retry();
                self.scheduler.set_connectivity_wait(false);
                self.abort_outstanding();
                if cause == StartCause::DailyAlarm {
                    // Re-pin tomorrow's alarm to local 09:30 whatever DST did.
                    self.scheduler.enable_daily(now);
                }
                tracing::info!(target: "alarm", ?cause, from = %self.state, "cycle start");
                self.begin_cycle(now, name);
            }
            Trigger::RetryFire => {
                // A fire queued before its alarm was cancelled must not
                // re-enter the cycle.
                if self.scheduler.retry_at().is_none() {
                    tracing::debug!(target: "alarm", state = %self.state, "retry not armed, fire dropped");
                    return self.state;
                }
                self.scheduler.cancel_retry();
                self.remedy(now, name);
            }
            Trigger::ConnectivityRestored => {
                if !self.scheduler.connectivity_wait() {
                    tracing::debug!(target: "alarm", state = %self.state, "not waiting for the network, signal dropped");
                    return self.state;
                }
                self.scheduler.cancel_retry();
                self.scheduler.set_connectivity_wait(false);
                self.remedy(now, name);
            }
            Trigger::FetchResultArrived(result) => self.on_result(result, now),
        }
        self.state
    }

    /// Re-arm whatever the persisted state was waiting on. A request that
    /// was in flight died with the old process, so that cycle restarts.
    pub fn restore(&mut self, snap: &CoordinatorSnapshot, now: DateTime<Utc>) {
        self.next_id = self.next_id.max(snap.next_request_id);
        self.cycle_date = snap.cycle_date;
        tracing::info!(target: "alarm", state = %snap.state, "restoring coordinator");
        match snap.state {
            CycleState::Snoozed => {
                self.scheduler.schedule_retry(now);
                self.transition(CycleState::Snoozed, "restore");
            }
            CycleState::WaitingForConnectivity => {
                self.scheduler.set_connectivity_wait(true);
                self.transition(CycleState::WaitingForConnectivity, "restore");
            }
            CycleState::AwaitingPrimary | CycleState::AwaitingSecondary => {
                self.begin_cycle(now, "restore");
            }
            other => self.transition(other, "restore"),
        }
    }

    /// Keep only the request counter and cycle date from a snapshot; used
    /// when the alarm is off, so nothing gets re-armed.
    pub fn restore_counters(&mut self, snap: &CoordinatorSnapshot) {
        self.next_id = self.next_id.max(snap.next_request_id);
        self.cycle_date = snap.cycle_date;
        tracing::info!(target: "alarm", state = %snap.state, "alarm off, persisted cycle not resumed");
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            state: self.state,
            outstanding: self.outstanding.clone(),
            cycle_date: self.cycle_date,
            next_request_id: self.next_id,
            daily_at: self.scheduler.daily_at(),
            retry_at: self.scheduler.retry_at(),
            connectivity_wait: self.scheduler.connectivity_wait(),
            updated_at: now,
        }
    }

    fn remedy(&mut self, now: DateTime<Utc>, trigger: &'static str) {
        if self.state.accepts_remedy() {
            self.begin_cycle(now, trigger);
        } else {
            tracing::debug!(target: "alarm", trigger, state = %self.state, "late signal ignored");
        }
    }

    fn begin_cycle(&mut self, now: DateTime<Utc>, trigger: &'static str) {
        let date = self.calc.most_recent_available_date(now);
        self.cycle_date = Some(date);
        self.regular = None;
        self.day_hash = None;
        counter!("alarm_cycles_started_total").increment(1);
        self.issue(Variant::Primary, date);
        self.transition(CycleState::AwaitingPrimary, trigger);
    }

    fn issue(&mut self, variant: Variant, date: NaiveDate) {
        let request = FetchRequest {
            variant,
            date,
            request_id: RequestId(self.next_id),
            flags: RequestFlags::ALARM,
        };
        self.next_id += 1;
        tracing::debug!(
            target: "alarm",
            id = %request.request_id,
            variant = variant.as_str(),
            %date,
            "issuing fetch"
        );
        self.sink.in_progress(date, variant);
        self.outstanding = Some(request.clone());
        self.fetcher.submit(request);
    }

    fn abort_outstanding(&mut self) {
        if let Some(req) = self.outstanding.take() {
            tracing::info!(target: "alarm", id = %req.request_id, "aborting in-flight request");
            self.fetcher.abort(req.request_id);
            self.sink.clear_in_progress();
        }
    }

    fn on_result(&mut self, result: FetchResult, now: DateTime<Utc>) {
        let awaited = match self.outstanding.take() {
            Some(req) if req.request_id == result.request_id => req,
            other => {
                tracing::debug!(
                    target: "alarm",
                    id = %result.request_id,
                    awaited = ?other.as_ref().map(|r| r.request_id),
                    "stale result dropped"
                );
                self.outstanding = other;
                counter!("alarm_stale_results_total").increment(1);
                return;
            }
        };

        self.sink.clear_in_progress();
        counter!("alarm_fetch_results_total", "code" => result.code.as_str()).increment(1);

        match result.code {
            ResultCode::Success => match result.validate_success(&awaited) {
                Ok(point) => self.on_point(point, result.day_hash, &awaited),
                Err(e) => {
                    tracing::warn!(target: "alarm", id = %awaited.request_id, "malformed result: {e}");
                    self.fail("malformed_result");
                }
            },
            ResultCode::NoConnection => {
                tracing::info!(target: "alarm", "no connection, waiting for the network");
                self.scheduler.set_connectivity_wait(true);
                self.transition(CycleState::WaitingForConnectivity, "no_connection");
            }
            ResultCode::NotPostedYet => {
                tracing::info!(target: "alarm", date = %awaited.date, "not posted yet, snoozing");
                self.scheduler.schedule_retry(now);
                self.transition(CycleState::Snoozed, "not_posted_yet");
            }
            ResultCode::NetworkError => {
                tracing::warn!(target: "alarm", "network error, not rescheduling");
                self.fail("network_error");
            }
        }
    }

    fn on_point(&mut self, point: HashPoint, day_hash: Option<DayHash>, awaited: &FetchRequest) {
        match awaited.variant {
            Variant::Primary => {
                self.regular = Some(point);
                self.day_hash = day_hash.filter(|d| d.date == awaited.date);
                self.issue(Variant::Secondary, awaited.date);
                self.transition(CycleState::AwaitingSecondary, "primary_ok");
            }
            Variant::Secondary => {
                let Some(regular) = self.regular.take() else {
                    tracing::warn!(target: "alarm", "secondary arrived without a primary point");
                    self.fail("missing_primary");
                    return;
                };
                let day_hash = self.day_hash.take();
                self.match_known_locations(&regular, day_hash.as_ref(), &point);
                counter!("alarm_cycles_done_total").increment(1);
                gauge!("alarm_last_done_ts").set(Utc::now().timestamp() as f64);
                self.transition(CycleState::Done, "secondary_ok");
            }
        }
    }

    fn match_known_locations(
        &mut self,
        regular: &HashPoint,
        day_hash: Option<&DayHash>,
        global: &HashPoint,
    ) {
        self.sink.clear_matches();
        let locations = match self.locations.known_locations() {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(target: "alarm", "known locations unavailable: {e:#}");
                return;
            }
        };
        if locations.is_empty() {
            tracing::debug!(target: "alarm", "no known locations, nothing to match");
            return;
        }

        let outcome = self.matcher.match_day(&locations, regular, day_hash, Some(global));
        for batch in outcome.batches() {
            counter!("alarm_match_batches_total", "kind" => batch.kind.as_str()).increment(1);
            self.sink.emit(batch);
        }
        tracing::info!(
            target: "alarm",
            regular = outcome.regular.len(),
            global = outcome.global.len(),
            "known locations matched"
        );
        self.last_outcome = Some(outcome);
    }

    fn fail(&mut self, why: &'static str) {
        self.regular = None;
        self.day_hash = None;
        counter!("alarm_cycles_failed_total").increment(1);
        self.transition(CycleState::Failed, why);
    }

    fn transition(&mut self, next: CycleState, trigger: &'static str) {
        if self.state != next {
            tracing::info!(target: "alarm", from = %self.state, to = %next, trigger, "transition");
        }
        self.state = next;
    }
}

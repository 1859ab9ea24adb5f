// src/fetch/djia.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use super::geohash::{djia_date_for, global_point, regular_point, DayHash, Graticule};
use super::{FetchCollaborator, FetchRequest, FetchResult, HashPoint, RequestId, ResultCode, Variant};
use crate::coordinator::Trigger;
use crate::worker::Event;

/// Default source of Dow openings; `{date}` becomes `YYYY/MM/DD`.
pub const DEFAULT_DJIA_URL: &str = "http://geo.crox.net/djia/{date}";

/// Fetches the Dow opening over HTTP and turns it into a hash point.
/// Each request runs on its own task and reports back through the worker
/// channel, so `submit` never blocks.
#[derive(Clone)]
pub struct DjiaFetcher {
    client: Client,
    url_template: String,
    graticule: Graticule,
    timeout: Duration,
    events: UnboundedSender<Event>,
    in_flight: Arc<Mutex<HashMap<RequestId, AbortHandle>>>,
}

impl DjiaFetcher {
    pub fn new(url_template: String, graticule: Graticule, events: UnboundedSender<Event>) -> Self {
        Self {
            client: Client::new(),
            url_template,
            graticule,
            timeout: Duration::from_secs(15),
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn url_for(&self, date: NaiveDate) -> String {
        self.url_template
            .replace("{date}", &date.format("%Y/%m/%d").to_string())
    }

    /// Opening date the request needs: regular points follow the home
    /// graticule's 30W rule, the globalhash always uses it.
    pub fn djia_date(&self, request: &FetchRequest) -> NaiveDate {
        match request.variant {
            Variant::Primary => djia_date_for(request.date, self.graticule.uses_30w_rule()),
            Variant::Secondary => djia_date_for(request.date, true),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    async fn fetch_opening(&self, date: NaiveDate) -> Result<String, ResultCode> {
        let url = self.url_for(date);
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(target: "fetch", error = %e, %url, "request failed");
                classify_error(&e)
            })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ResultCode::NotPostedYet);
        }
        if !status.is_success() {
            tracing::warn!(target: "fetch", %status, %url, "unexpected status");
            return Err(ResultCode::NetworkError);
        }
        let body = resp.text().await.map_err(|e| classify_error(&e))?;
        parse_opening(&body).ok_or(ResultCode::NotPostedYet)
    }

    async fn run(&self, request: FetchRequest) -> FetchResult {
        let djia_date = self.djia_date(&request);
        match self.fetch_opening(djia_date).await {
            Ok(djia) => {
                tracing::info!(
                    target: "fetch",
                    id = %request.request_id,
                    variant = request.variant.as_str(),
                    %djia_date,
                    %djia,
                    "opening fetched"
                );
                let result = FetchResult::success(&request, point_for(&request, &djia, &self.graticule));
                match request.variant {
                    Variant::Primary => {
                        let other = self.other_side_opening(&request, djia_date).await;
                        result.with_day_hash(DayHash::new(
                            request.date,
                            self.graticule.uses_30w_rule(),
                            &djia,
                            other.as_deref(),
                        ))
                    }
                    Variant::Secondary => result,
                }
            }
            Err(code) => FetchResult::failure(&request, code),
        }
    }

    /// Opening for graticules on the other side of 30W, so saved locations
    /// outside the home graticule get their own regular point. Best effort:
    /// a miss only leaves those graticules without one.
    async fn other_side_opening(&self, request: &FetchRequest, home: NaiveDate) -> Option<String> {
        let other = djia_date_for(request.date, !self.graticule.uses_30w_rule());
        if other == home {
            return None;
        }
        match self.fetch_opening(other).await {
            Ok(djia) => Some(djia),
            Err(code) => {
                tracing::debug!(target: "fetch", id = %request.request_id, djia_date = %other, ?code, "other-side opening unavailable");
                None
            }
        }
    }
}

impl FetchCollaborator for DjiaFetcher {
    fn submit(&self, request: FetchRequest) {
        let id = request.request_id;
        let this = self.clone();
        let Ok(mut in_flight) = self.in_flight.lock() else {
            tracing::error!(target: "fetch", "in-flight map poisoned");
            return;
        };
        let task = tokio::spawn(async move {
            let result = this.run(request).await;
            if let Ok(mut m) = this.in_flight.lock() {
                m.remove(&id);
            }
            if this
                .events
                .send(Event::Trigger(Trigger::FetchResultArrived(result)))
                .is_err()
            {
                tracing::debug!(target: "fetch", %id, "worker gone, dropping result");
            }
        });
        in_flight.insert(id, task.abort_handle());
    }

    fn abort(&self, request_id: RequestId) {
        let handle = self.in_flight.lock().ok().and_then(|mut m| m.remove(&request_id));
        if let Some(h) = handle {
            h.abort();
            tracing::debug!(target: "fetch", id = %request_id, "request aborted");
        }
    }
}

fn classify_error(e: &reqwest::Error) -> ResultCode {
    if e.is_connect() {
        ResultCode::NoConnection
    } else {
        ResultCode::NetworkError
    }
}

/// The service answers with the bare opening, e.g. `38711.29`. Anything
/// else ("error", empty) means the value isn't there yet.
pub fn parse_opening(body: &str) -> Option<String> {
    let trimmed = body.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(trimmed.to_string()),
        _ => None,
    }
}

pub fn point_for(request: &FetchRequest, djia: &str, graticule: &Graticule) -> HashPoint {
    match request.variant {
        Variant::Primary => regular_point(request.date, djia, graticule),
        Variant::Secondary => global_point(request.date, djia),
    }
}

// src/fetch/mod.rs
//! Request/result types exchanged with the fetch collaborator.
//!
//! The coordinator only issues [`FetchRequest`]s and interprets the
//! [`ResultCode`] of the matching [`FetchResult`]; how the value is fetched
//! lives behind [`FetchCollaborator`].

pub mod djia;
pub mod geohash;

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use self::geohash::DayHash;

/// Which of the two daily computations a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Regular hash point (home graticule).
    Primary,
    /// Globalhash point.
    Secondary,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Primary => "primary",
            Variant::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bit flags carried along with a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFlags(u32);

impl RequestFlags {
    /// Request was issued by the background alarm, not by a user.
    pub const ALARM: RequestFlags = RequestFlags(1);

    pub fn contains(self, other: RequestFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub variant: Variant,
    pub date: NaiveDate,
    pub request_id: RequestId,
    pub flags: RequestFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    NotPostedYet,
    NoConnection,
    NetworkError,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::NotPostedYet => "not_posted_yet",
            ResultCode::NoConnection => "no_connection",
            ResultCode::NetworkError => "network_error",
        }
    }
}

/// Final coordinate computed for a date and variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HashPoint {
    pub date: NaiveDate,
    pub variant: Variant,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub request_id: RequestId,
    pub code: ResultCode,
    pub variant: Option<Variant>,
    pub payload: Option<HashPoint>,
    /// Primary results may carry the day's fractions for every graticule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_hash: Option<DayHash>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedResult {
    #[error("success result carries no variant")]
    MissingVariant,
    #[error("success result carries no hash point")]
    MissingPoint,
    #[error("result is for {got:?}, awaited {expected:?}")]
    VariantMismatch { expected: Variant, got: Variant },
    #[error("hash point is for {got}, awaited {expected}")]
    DateMismatch { expected: NaiveDate, got: NaiveDate },
    #[error("hash point coordinates out of range ({latitude}, {longitude})")]
    BadCoordinates { latitude: f64, longitude: f64 },
}

impl FetchResult {
    pub fn success(request: &FetchRequest, point: HashPoint) -> Self {
        Self {
            request_id: request.request_id,
            code: ResultCode::Success,
            variant: Some(request.variant),
            payload: Some(point),
            day_hash: None,
        }
    }

    pub fn with_day_hash(mut self, day_hash: DayHash) -> Self {
        self.day_hash = Some(day_hash);
        self
    }

    pub fn failure(request: &FetchRequest, code: ResultCode) -> Self {
        Self {
            request_id: request.request_id,
            code,
            variant: Some(request.variant),
            payload: None,
            day_hash: None,
        }
    }

    /// Checks a `Success` result against the request it answers and hands
    /// back its hash point.
    pub fn validate_success(&self, awaited: &FetchRequest) -> Result<HashPoint, MalformedResult> {
        let variant = self.variant.ok_or(MalformedResult::MissingVariant)?;
        if variant != awaited.variant {
            return Err(MalformedResult::VariantMismatch {
                expected: awaited.variant,
                got: variant,
            });
        }
        let point = self.payload.ok_or(MalformedResult::MissingPoint)?;
        if point.variant != awaited.variant {
            return Err(MalformedResult::VariantMismatch {
                expected: awaited.variant,
                got: point.variant,
            });
        }
        if point.date != awaited.date {
            return Err(MalformedResult::DateMismatch {
                expected: awaited.date,
                got: point.date,
            });
        }
        let lat_ok = point.latitude.is_finite() && point.latitude.abs() <= 90.0;
        let lon_ok = point.longitude.is_finite() && point.longitude.abs() <= 180.0;
        if !(lat_ok && lon_ok) {
            return Err(MalformedResult::BadCoordinates {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }
        Ok(point)
    }
}

/// External collaborator that performs the actual fetch. `submit` must not
/// block; the result comes back later as a `FetchResultArrived` trigger.
pub trait FetchCollaborator: Send + Sync {
    fn submit(&self, request: FetchRequest);

    /// Drop interest in an in-flight request. Best effort.
    fn abort(&self, _request_id: RequestId) {}
}

//! # Known Location Matcher
//! Matches today's hash points against the user's saved locations.
//!
//! A location matches a point when the great-circle distance between them
//! is within the location's proximity radius. Regular and global matches
//! are kept in separate lists, each sorted nearest-first with a stable sort
//! keyed on distance alone, so equal distances keep their input order.
//!
//! Given the day's fractions, each location is tested against the regular
//! point closest to it, which may lie in a graticule other than the home
//! one. Without them every location is tested against the home point.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::fetch::geohash::DayHash;
use crate::fetch::HashPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownLocation {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Alert radius in meters.
    pub proximity_radius: f64,
}

impl KnownLocation {
    pub fn distance_to(&self, point: &HashPoint) -> f64 {
        great_circle_m(self.latitude, self.longitude, point.latitude, point.longitude)
    }
}

/// Read-only source of saved locations.
pub trait KnownLocationStore: Send + Sync {
    fn known_locations(&self) -> anyhow::Result<Vec<KnownLocation>>;
}

/// Fixed in-memory list, e.g. loaded once from config.
#[derive(Debug, Clone, Default)]
pub struct StaticLocations(pub Vec<KnownLocation>);

impl KnownLocationStore for StaticLocations {
    fn known_locations(&self) -> anyhow::Result<Vec<KnownLocation>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Regular,
    Global,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Regular => "regular",
            BatchKind::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub location: KnownLocation,
    pub hash_point: HashPoint,
    /// Meters.
    pub distance: f64,
}

/// What the alert sink receives: the nearest match plus how many others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchBatch {
    pub kind: BatchKind,
    pub best: MatchRecord,
    pub additional_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub regular: Vec<MatchRecord>,
    pub global: Vec<MatchRecord>,
}

impl MatchOutcome {
    /// Zero, one or two batches; empty lists emit nothing.
    pub fn batches(&self) -> Vec<MatchBatch> {
        [
            (BatchKind::Regular, &self.regular),
            (BatchKind::Global, &self.global),
        ]
        .into_iter()
        .filter_map(|(kind, list)| {
            list.first().map(|best| MatchBatch {
                kind,
                best: best.clone(),
                additional_count: list.len() - 1,
            })
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KnownLocationMatcher;

impl KnownLocationMatcher {
    pub fn is_match(location: &KnownLocation, point: &HashPoint) -> bool {
        location.distance_to(point) <= location.proximity_radius
    }

    pub fn match_points(
        &self,
        locations: &[KnownLocation],
        regular: &HashPoint,
        global: Option<&HashPoint>,
    ) -> MatchOutcome {
        self.match_day(locations, regular, None, global)
    }

    /// Like `match_points`, but a location's regular point is the one
    /// `day` places closest to it; `regular` covers graticules `day` has
    /// no fractions for.
    pub fn match_day(
        &self,
        locations: &[KnownLocation],
        regular: &HashPoint,
        day: Option<&DayHash>,
        global: Option<&HashPoint>,
    ) -> MatchOutcome {
        let regular_for = |loc: &KnownLocation| {
            day.and_then(|d| d.closest_to(loc.latitude, loc.longitude))
                .unwrap_or(*regular)
        };
        let mut out = MatchOutcome {
            regular: collect_matches(locations, regular_for),
            global: global
                .map(|g| collect_matches(locations, |_| *g))
                .unwrap_or_default(),
        };
        rank(&mut out.regular);
        rank(&mut out.global);
        out
    }
}

fn collect_matches(
    locations: &[KnownLocation],
    point_for: impl Fn(&KnownLocation) -> HashPoint,
) -> Vec<MatchRecord> {
    locations
        .iter()
        .filter_map(|loc| {
            let point = point_for(loc);
            let distance = loc.distance_to(&point);
            (distance <= loc.proximity_radius).then(|| MatchRecord {
                location: loc.clone(),
                hash_point: point,
                distance,
            })
        })
        .collect()
}

/// Nearest first. Comparator looks only at distance; `sort_by` is stable.
pub fn rank(matches: &mut [MatchRecord]) {
    matches.sort_by(by_distance);
}

fn by_distance(a: &MatchRecord, b: &MatchRecord) -> Ordering {
    a.distance.total_cmp(&b.distance)
}

/// Haversine distance in meters.
pub fn great_circle_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

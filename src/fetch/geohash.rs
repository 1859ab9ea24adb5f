// src/fetch/geohash.rs
//! Hash point math: MD5 of `YYYY-MM-DD-<dow opening>`, split into two
//! fractions, then placed either inside a graticule or on the whole globe.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use super::{HashPoint, Variant};
use crate::matcher::great_circle_m;

/// First date the 30W rule is in effect.
pub fn thirty_west_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2008, 5, 27).expect("valid date")
}

/// Date whose Dow opening feeds the hash for `date`.
pub fn djia_date_for(date: NaiveDate, uses_30w_rule: bool) -> NaiveDate {
    if uses_30w_rule && date >= thirty_west_start() {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Both fractional offsets in [0, 1), from the two halves of the digest.
pub fn hash_fractions(date: NaiveDate, djia: &str) -> (f64, f64) {
    let input = format!("{}-{}", date.format("%Y-%m-%d"), djia);
    let digest = Md5::digest(input.as_bytes());
    let mut lat = [0u8; 8];
    let mut lon = [0u8; 8];
    lat.copy_from_slice(&digest[..8]);
    lon.copy_from_slice(&digest[8..]);
    (to_fraction(u64::from_be_bytes(lat)), to_fraction(u64::from_be_bytes(lon)))
}

fn to_fraction(bits: u64) -> f64 {
    bits as f64 / 2f64.powi(64)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid graticule {0:?} (expected \"<lat>,<lon>\", e.g. \"37,-122\" or \"-0,-0\")")]
pub struct GraticuleParseError(String);

/// One-degree cell. Signs are kept apart from magnitudes so the "-0"
/// graticules stay distinct from "0".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Graticule {
    lat: u8,
    lon: u8,
    south: bool,
    west: bool,
}

impl Graticule {
    pub fn new(lat: u8, south: bool, lon: u8, west: bool) -> Option<Self> {
        (lat < 90 && lon < 180).then_some(Self { lat, lon, south, west })
    }

    /// East of 30W uses the previous day's opening.
    pub fn uses_30w_rule(&self) -> bool {
        !self.west || self.lon < 30
    }

    /// Graticule a coordinate lies in; `-0.3` lands in "-0".
    pub fn containing(latitude: f64, longitude: f64) -> Self {
        let (lat, lon) = (latitude.floor() as i32, longitude.floor() as i32);
        Self::from_cell(lat.clamp(-90, 89), lon).unwrap_or(Self {
            lat: 0,
            lon: 0,
            south: false,
            west: false,
        })
    }

    /// Signed cell index: floor of any coordinate inside the graticule.
    pub fn cell(&self) -> (i32, i32) {
        let signed = |mag: u8, neg: bool| if neg { -(mag as i32) - 1 } else { mag as i32 };
        (signed(self.lat, self.south), signed(self.lon, self.west))
    }

    /// Inverse of `cell`. Longitude wraps at the antimeridian, latitude
    /// past a pole has no cell.
    pub fn from_cell(lat: i32, lon: i32) -> Option<Self> {
        if !(-90..=89).contains(&lat) {
            return None;
        }
        let lon = (lon + 180).rem_euclid(360) - 180;
        let split = |i: i32| if i < 0 { ((-i - 1) as u8, true) } else { (i as u8, false) };
        let (lat, south) = split(lat);
        let (lon, west) = split(lon);
        Self::new(lat, south, lon, west)
    }

    pub fn place(&self, f_lat: f64, f_lon: f64) -> (f64, f64) {
        let lat = self.lat as f64 + f_lat;
        let lon = self.lon as f64 + f_lon;
        (
            if self.south { -lat } else { lat },
            if self.west { -lon } else { lon },
        )
    }
}

impl fmt::Display for Graticule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = if self.south { "-" } else { "" };
        let w = if self.west { "-" } else { "" };
        write!(f, "{s}{},{w}{}", self.lat, self.lon)
    }
}

impl FromStr for Graticule {
    type Err = GraticuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || GraticuleParseError(s.to_string());
        let (lat, lon) = s.split_once(',').ok_or_else(err)?;
        let parse = |part: &str| -> Option<(u8, bool)> {
            let part = part.trim();
            let (neg, digits) = match part.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, part.strip_prefix('+').unwrap_or(part)),
            };
            digits.parse::<u8>().ok().map(|v| (v, neg))
        };
        let (lat, south) = parse(lat).ok_or_else(err)?;
        let (lon, west) = parse(lon).ok_or_else(err)?;
        Graticule::new(lat, south, lon, west).ok_or_else(err)
    }
}

/// Regular hash point for `date` inside `graticule`.
pub fn regular_point(date: NaiveDate, djia: &str, graticule: &Graticule) -> HashPoint {
    let (f_lat, f_lon) = hash_fractions(date, djia);
    let (latitude, longitude) = graticule.place(f_lat, f_lon);
    HashPoint {
        date,
        variant: Variant::Primary,
        latitude,
        longitude,
    }
}

/// The day's regular-hash fractions for both sides of the 30W line, so
/// the regular point can be placed in any graticule, not just the home one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayHash {
    pub date: NaiveDate,
    /// From the same day's opening (graticules west of 30W).
    pub west: Option<(f64, f64)>,
    /// From the previous day's opening (30W rule).
    pub east: Option<(f64, f64)>,
}

impl DayHash {
    /// Builds the day hash from the opening the home graticule needs and,
    /// when it differs, the opening for the other side of 30W.
    pub fn new(date: NaiveDate, home_uses_30w: bool, home_djia: &str, other_djia: Option<&str>) -> Self {
        let home = Some(hash_fractions(date, home_djia));
        let other = if date < thirty_west_start() {
            home
        } else {
            other_djia.map(|d| hash_fractions(date, d))
        };
        let (west, east) = if home_uses_30w { (other, home) } else { (home, other) };
        Self { date, west, east }
    }

    pub fn fractions_for(&self, graticule: &Graticule) -> Option<(f64, f64)> {
        if graticule.uses_30w_rule() && self.date >= thirty_west_start() {
            self.east
        } else {
            self.west
        }
    }

    pub fn point_in(&self, graticule: &Graticule) -> Option<HashPoint> {
        let (f_lat, f_lon) = self.fractions_for(graticule)?;
        let (latitude, longitude) = graticule.place(f_lat, f_lon);
        Some(HashPoint {
            date: self.date,
            variant: Variant::Primary,
            latitude,
            longitude,
        })
    }

    /// Nearest regular point to a coordinate: the one in its own graticule
    /// or in one of the eight around it.
    pub fn closest_to(&self, latitude: f64, longitude: f64) -> Option<HashPoint> {
        let (lat0, lon0) = Graticule::containing(latitude, longitude).cell();
        let mut best: Option<(f64, HashPoint)> = None;
        for dlat in -1..=1 {
            for dlon in -1..=1 {
                let Some(p) = Graticule::from_cell(lat0 + dlat, lon0 + dlon)
                    .and_then(|g| self.point_in(&g))
                else {
                    continue;
                };
                let d = great_circle_m(latitude, longitude, p.latitude, p.longitude);
                if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
                    best = Some((d, p));
                }
            }
        }
        best.map(|(_, p)| p)
    }
}

/// Globalhash point for `date`. Callers feed it the 30W-rule opening.
pub fn global_point(date: NaiveDate, djia: &str) -> HashPoint {
    let (f_lat, f_lon) = hash_fractions(date, djia);
    HashPoint {
        date,
        variant: Variant::Secondary,
        latitude: f_lat * 180.0 - 90.0,
        longitude: f_lon * 360.0 - 180.0,
    }
}

// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fetch::djia::DEFAULT_DJIA_URL;
use crate::fetch::geohash::Graticule;
use crate::matcher::{KnownLocation, KnownLocationStore};
use crate::scheduler::connectivity::DEFAULT_CHECK_ADDR;
use crate::scheduler::DEFAULT_RETRY_MINUTES;
use crate::state::DEFAULT_STATE_PATH;
use crate::stock_date::StockDateCalculator;

pub const ENV_CONFIG_PATH: &str = "ALARM_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Stock alarm switched on.
    pub enabled: bool,
    /// Run a cycle right after boot instead of waiting for 09:30.
    pub fetch_on_boot: bool,
    pub timezone: String,
    /// "HH:MM" local time after which the day's opening is trusted.
    pub cutoff: String,
    pub retry_minutes: i64,
    pub djia_url: String,
    pub fetch_timeout_secs: u64,
    pub graticule: String,
    pub state_path: PathBuf,
    pub listen_addr: String,
    pub check_addr: String,
    pub check_interval_secs: u64,
    pub known_locations: Vec<KnownLocation>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_on_boot: false,
            timezone: "America/New_York".into(),
            cutoff: "09:30".into(),
            retry_minutes: DEFAULT_RETRY_MINUTES,
            djia_url: DEFAULT_DJIA_URL.into(),
            fetch_timeout_secs: 15,
            graticule: "37,-122".into(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            listen_addr: "127.0.0.1:8087".into(),
            check_addr: DEFAULT_CHECK_ADDR.into(),
            check_interval_secs: 30,
            known_locations: Vec::new(),
        }
    }
}

impl AlarmConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading alarm config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, &ext).with_context(|| format!("in {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $ALARM_CONFIG_PATH
    /// 2) config/alarm.toml
    /// 3) config/alarm.json
    /// 4) built-in defaults
    ///
    /// Returns the path the config came from, if any.
    pub fn load_default() -> Result<(Self, Option<PathBuf>)> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Ok((Self::load_from(&pb)?, Some(pb)));
        }
        for candidate in ["config/alarm.toml", "config/alarm.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Ok((Self::load_from(&pb)?, Some(pb)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let cfg: AlarmConfig = if hint_ext == "json" {
            serde_json::from_str(s).context("parsing JSON config")?
        } else {
            toml::from_str(s).context("parsing TOML config")?
        };
        cfg.validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.calculator()?;
        self.graticule()?;
        if self.retry_minutes <= 0 {
            bail!("retry_minutes must be positive, got {}", self.retry_minutes);
        }
        if self.check_interval_secs == 0 {
            bail!("check_interval_secs must be at least 1");
        }
        if !self.djia_url.contains("{date}") {
            bail!("djia_url must contain a {{date}} placeholder");
        }
        validate_locations(&self.known_locations)?;
        Ok(self)
    }

    pub fn calculator(&self) -> Result<StockDateCalculator> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|e| anyhow!("unknown timezone {:?}: {e}", self.timezone))?;
        let cutoff = NaiveTime::parse_from_str(&self.cutoff, "%H:%M")
            .with_context(|| format!("cutoff {:?} is not HH:MM", self.cutoff))?;
        Ok(StockDateCalculator::new(tz, cutoff))
    }

    pub fn graticule(&self) -> Result<Graticule> {
        Ok(self.graticule.parse::<Graticule>()?)
    }

    pub fn retry_after(&self) -> Duration {
        Duration::minutes(self.retry_minutes)
    }
}

fn validate_locations(locations: &[KnownLocation]) -> Result<()> {
    let mut ids = HashSet::new();
    for loc in locations {
        let ctx = || format!("known location {:?} ({})", loc.id, loc.name);
        if loc.id.trim().is_empty() {
            return Err(anyhow!("empty id")).with_context(ctx);
        }
        if !ids.insert(loc.id.as_str()) {
            return Err(anyhow!("duplicate id")).with_context(ctx);
        }
        if !(loc.latitude.is_finite() && (-90.0..=90.0).contains(&loc.latitude)) {
            return Err(anyhow!("latitude {} out of range", loc.latitude)).with_context(ctx);
        }
        if !(loc.longitude.is_finite() && (-180.0..=180.0).contains(&loc.longitude)) {
            return Err(anyhow!("longitude {} out of range", loc.longitude)).with_context(ctx);
        }
        if !(loc.proximity_radius.is_finite() && loc.proximity_radius >= 0.0) {
            return Err(anyhow!("proximity_radius {} invalid", loc.proximity_radius))
                .with_context(ctx);
        }
    }
    Ok(())
}

/// Re-reads the config file on every call, so edits to the saved
/// locations apply to the next cycle without a restart.
#[derive(Debug, Clone)]
pub struct ConfigLocationStore {
    path: PathBuf,
}

impl ConfigLocationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl KnownLocationStore for ConfigLocationStore {
    fn known_locations(&self) -> Result<Vec<KnownLocation>> {
        Ok(AlarmConfig::load_from(&self.path)?.known_locations)
    }
}

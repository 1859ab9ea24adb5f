use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::coordinator::CycleState;
use crate::fetch::FetchRequest;

pub const DEFAULT_STATE_PATH: &str = "state/alarm.json";

/// What survives a restart, and what `/status` shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub state: CycleState,
    pub outstanding: Option<FetchRequest>,
    pub cycle_date: Option<NaiveDate>,
    pub next_request_id: u64,
    #[serde(default)]
    pub daily_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connectivity_wait: bool,
    pub updated_at: DateTime<Utc>,
}

impl CoordinatorSnapshot {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            state: CycleState::Idle,
            outstanding: None,
            cycle_date: None,
            next_request_id: 1,
            daily_at: None,
            retry_at: None,
            connectivity_wait: false,
            updated_at: now,
        }
    }
}

/// Missing or unreadable state is not an error: start fresh.
pub async fn read_state(path: &Path) -> Option<CoordinatorSnapshot> {
    let raw = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(target: "alarm", path = %path.display(), "ignoring corrupt state: {e}");
            None
        }
    }
}

pub async fn write_state(path: &Path, snap: &CoordinatorSnapshot) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating state dir {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(snap).context("serializing state")?;
    // write-then-rename so a crash never leaves half a file behind
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

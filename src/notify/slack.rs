use anyhow::{Context, Result};
use reqwest::Client;

use super::{MatchAlert, Notifier};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
        }
    }
}

pub fn slack_text(alert: &MatchAlert) -> String {
    format!(
        "*{}*\n{}\n<https://www.openstreetmap.org/?mlat={lat:.6}&mlon={lon:.6}|{lat:.5}, {lon:.5}>",
        alert.title(),
        alert.summary(),
        lat = alert.latitude,
        lon = alert.longitude,
    )
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, alert: &MatchAlert) -> Result<()> {
        let body = serde_json::json!({ "text": slack_text(alert) });

        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::BatchKind;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn text_links_the_point() {
        let alert = MatchAlert {
            kind: BatchKind::Regular,
            date: NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
            location_id: "home".into(),
            location_name: "Home".into(),
            distance_m: 2_500.0,
            additional_count: 1,
            latitude: 37.5,
            longitude: -122.25,
            ts: Utc::now(),
        };
        let t = slack_text(&alert);
        assert!(t.contains("2.5 km from Home (+1 more nearby)"));
        assert!(t.contains("mlat=37.500000&mlon=-122.250000"));
    }
}

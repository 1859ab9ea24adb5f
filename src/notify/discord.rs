use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{MatchAlert, Notifier};
use crate::matcher::BatchKind;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post_with_retries(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, alert: &MatchAlert) -> Result<()> {
        self.post_with_retries(&MatchEmbed::from_alert(alert).into_payload())
            .await
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

const REGULAR_COLOR: u32 = 0x2e_86_c1;
const GLOBAL_COLOR: u32 = 0xd6_8a_10;

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct MatchEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
}

impl MatchEmbed {
    fn from_alert(alert: &MatchAlert) -> Self {
        let color = match alert.kind {
            BatchKind::Regular => REGULAR_COLOR,
            BatchKind::Global => GLOBAL_COLOR,
        };
        Self {
            title: alert.title(),
            description: alert.summary(),
            color,
            timestamp: alert.ts.to_rfc3339(),
            fields: vec![
                EmbedField {
                    name: "Point",
                    value: format!("{:.5}, {:.5}", alert.latitude, alert.longitude),
                    inline: true,
                },
                EmbedField {
                    name: "Nearest",
                    value: format!("{} ({})", alert.location_name, alert.location_id),
                    inline: true,
                },
            ],
        }
    }

    fn into_payload(self) -> DiscordWebhookPayload {
        DiscordWebhookPayload {
            content: None,
            embeds: vec![self],
        }
    }
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<MatchEmbed>,
}

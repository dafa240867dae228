//! Slack incoming-webhook alerts.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::AlertSink;

const ALERT_TITLE: &str = "FILE SYNC FAILED";
const ALERT_COLOR: &str = "#ff3300";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    attachments: [Attachment<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    pretext: &'a str,
    title: &'a str,
    text: String,
    color: &'a str,
}

#[derive(Debug, Clone)]
pub struct SlackWebhook {
    client: reqwest::Client,
    url: String,
    application_name: String,
}

impl SlackWebhook {
    pub fn new(url: impl Into<String>, application_name: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            application_name: application_name.into(),
        })
    }

    fn payload<'a>(&'a self, message: &'a str) -> WebhookPayload<'a> {
        WebhookPayload {
            attachments: [Attachment {
                pretext: message,
                title: ALERT_TITLE,
                text: format!("File Synchronisation failed for {}", self.application_name),
                color: ALERT_COLOR,
            }],
        }
    }
}

#[async_trait]
impl AlertSink for SlackWebhook {
    async fn notify(&self, message: &str) {
        let result = self
            .client
            .post(&self.url)
            .json(&self.payload(message))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(status = %response.status(), "alert delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), alert = message, "webhook rejected alert");
            }
            Err(e) => {
                warn!(error = %e, alert = message, "failed to deliver alert");
            }
        }
    }
}

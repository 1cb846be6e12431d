#![doc = "Notification sink over HTTP: publishes completion signals to a Pub/Sub-style REST endpoint."]
//
//! # Publishing (CLI <-> Core)
//!
//! Bridges the core [`NotificationSink`] contract to a network publish API:
//!
//! ```text
//! POST {base_url}/v1/{topic}:publish
//! {"messages": [{"data": "<base64 payload>"}]}
//! ```
//!
//! `topic` is the full topic path, e.g. `projects/my-project/topics/audio-ready`.
//! The call resolves only after the endpoint answered with a 2xx status, which is the
//! acknowledgement the stage protocol waits for.
//!
//! - Construct [`PubSubSink`] with [`PubSubSink::new_from_env`]; the bearer token is read
//!   from `SPEECH_BUCKET_ACCESS_TOKEN` when present.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use speech_bucket_core::contract::{NotificationSink, NotifyError};
use std::env;
use std::time::Duration;

use crate::load_config::NotifySection;

/// Environment variable holding the bearer token for outbound API calls.
pub const ACCESS_TOKEN_ENV: &str = "SPEECH_BUCKET_ACCESS_TOKEN";

pub struct PubSubSink {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl PubSubSink {
    pub fn new(
        section: &NotifySection,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn new_from_env(section: &NotifySection, timeout: Duration) -> Result<Self, reqwest::Error> {
        let access_token = env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        tracing::info!(
            base_url = %section.base_url,
            token_set = access_token.is_some(),
            "Initialized notification sink from environment"
        );
        Self::new(section, access_token, timeout)
    }

    pub fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1/{}:publish", self.base_url, topic.trim_start_matches('/'))
    }
}

#[async_trait]
impl NotificationSink for PubSubSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        let url = self.publish_url(topic);
        let body = json!({ "messages": [{ "data": STANDARD.encode(&payload) }] });
        tracing::info!(%url, bytes = payload.len(), "Publishing notification");

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let fail = |reason: String| NotifyError::Publish {
            topic: topic.to_string(),
            reason,
        };
        let response = request.send().await.map_err(|e| {
            tracing::error!(error = ?e, %url, "Notification request failed");
            fail(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            tracing::error!(%status, %url, "Publish API returned error. Response body: {text}");
            return Err(fail(format!("HTTP {status}: {text}")));
        }
        tracing::info!(%status, "Notification acknowledged");
        Ok(())
    }
}

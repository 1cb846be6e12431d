//! Markup → audio transform backed by a text-to-speech REST endpoint.
//!
//! ```text
//! POST {endpoint}
//! {"input": {"ssml": "..."},
//!  "voice": {"languageCode": "en-US", "ssmlGender": "MALE"},
//!  "audioConfig": {"audioEncoding": "MP3"}}
//! → {"audioContent": "<base64 audio>"}
//! ```
//!
//! Failure mapping: a 4xx answer (other than 408 and 429) means the endpoint rejected
//! the markup, which is [`TransformError::Malformed`]. Transport errors, timeouts, 408,
//! 429 and 5xx are [`TransformError::Backend`] and left to redelivery.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use speech_bucket_core::contract::{Transform, TransformError};
use std::env;
use std::time::Duration;

use crate::load_config::SynthesizerSection;
use crate::notify::ACCESS_TOKEN_ENV;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig<'a>,
}

#[derive(Serialize)]
struct SynthesisInput<'a> {
    ssml: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    ssml_gender: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig<'a> {
    audio_encoding: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    section: SynthesizerSection,
    access_token: Option<String>,
}

impl HttpSynthesizer {
    pub fn new(
        section: SynthesizerSection,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            section,
            access_token,
        })
    }

    pub fn new_from_env(section: SynthesizerSection, timeout: Duration) -> Result<Self, reqwest::Error> {
        let access_token = env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        tracing::info!(
            endpoint = %section.endpoint,
            language_code = %section.language_code,
            token_set = access_token.is_some(),
            "Initialized synthesizer from environment"
        );
        Self::new(section, access_token, timeout)
    }
}

fn is_rejection(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Transform for HttpSynthesizer {
    async fn transform(&self, content: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let ssml = String::from_utf8(content)
            .map_err(|e| TransformError::Malformed(format!("markup is not UTF-8: {e}")))?;
        if ssml.trim().is_empty() {
            return Err(TransformError::Malformed("markup is empty".into()));
        }

        let body = SynthesizeRequest {
            input: SynthesisInput { ssml: &ssml },
            voice: VoiceSelection {
                language_code: &self.section.language_code,
                ssml_gender: &self.section.voice_gender,
            },
            audio_config: AudioConfig {
                audio_encoding: &self.section.audio_encoding,
            },
        };

        let mut request = self.client.post(&self.section.endpoint).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = ?e, endpoint = %self.section.endpoint, "Synthesis request failed");
            TransformError::Backend(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            tracing::error!(%status, "Synthesis API returned error. Response body: {text}");
            let reason = format!("HTTP {status}: {text}");
            return Err(if is_rejection(status) {
                TransformError::Malformed(reason)
            } else {
                TransformError::Backend(reason)
            });
        }

        let parsed: SynthesizeResponse = response.json().await.map_err(|e| {
            tracing::error!(error = ?e, "Synthesis response was not the expected JSON");
            TransformError::Backend(format!("invalid synthesis response: {e}"))
        })?;
        let audio = STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| TransformError::Backend(format!("audioContent is not base64: {e}")))?;

        tracing::info!(bytes = audio.len(), "Synthesized audio");
        Ok(audio)
    }
}

//! Plain text → SSML.
//!
//! The text is split into sentences at `.`, `!` or `?` followed by whitespace, each
//! sentence is trimmed and XML-escaped, and a `<break/>` is appended after it:
//!
//! ```text
//! "Hi there. Bye now."  →  <speak>Hi there.<break time="1s"/>Bye now.<break time="1s"/></speak>
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{Transform, TransformError};

/// Options for [`SsmlTransform`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsmlOptions {
    /// Value of the `time` attribute on the pause marker, e.g. `1s` or `500ms`.
    #[serde(default = "default_pause")]
    pub pause: String,
}

fn default_pause() -> String {
    "1s".to_string()
}

impl SsmlOptions {
    /// Check the options before any content is rendered with them.
    pub fn validate(&self) -> Result<(), String> {
        if is_valid_pause(&self.pause) {
            Ok(())
        } else {
            Err(format!(
                "invalid pause duration {:?}, expected e.g. \"1s\" or \"500ms\"",
                self.pause
            ))
        }
    }
}

impl Default for SsmlOptions {
    fn default() -> Self {
        Self {
            pause: default_pause(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SsmlTransform {
    options: SsmlOptions,
}

impl SsmlTransform {
    pub fn new(options: SsmlOptions) -> Self {
        Self { options }
    }

    /// Render `text` as SSML.
    pub fn render(&self, text: &str) -> Result<String, TransformError> {
        self.options.validate().map_err(TransformError::Malformed)?;

        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(TransformError::Malformed("no sentences in input".into()));
        }
        debug!(sentences = sentences.len(), "Segmented text into sentences");

        let pause = format!(r#"<break time="{}"/>"#, self.options.pause);
        let mut ssml = String::from("<speak>");
        for sentence in sentences {
            ssml.push_str(&escape_xml(sentence));
            ssml.push_str(&pause);
        }
        ssml.push_str("</speak>");
        Ok(ssml)
    }
}

#[async_trait]
impl Transform for SsmlTransform {
    async fn transform(&self, content: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let text = String::from_utf8(content)
            .map_err(|e| TransformError::Malformed(format!("input is not UTF-8: {e}")))?;
        self.render(&text).map(String::into_bytes)
    }
}

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence boundary pattern is valid"));

/// Split text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for found in SENTENCE_BOUNDARY.find_iter(text) {
        // Keep the terminator with its sentence; drop the whitespace.
        let end = found.start() + 1;
        sentences.push(text[start..end].trim());
        start = found.end();
    }
    sentences.push(text[start..].trim());
    sentences.retain(|s| !s.is_empty());
    sentences
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn is_valid_pause(pause: &str) -> bool {
    let digits = pause
        .strip_suffix("ms")
        .or_else(|| pause.strip_suffix('s'));
    matches!(digits, Some(d) if !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
}

//! Google Gemini `generateContent` client.
//!
//! Requests go out as a single user turn holding the image as base64
//! `inlineData` followed by the prompt text. Only the text parts of the first
//! candidate are returned; everything else in the reply is ignored.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{ModelClient, ModelRequest};
use crate::config::ModelSettings;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Connection settings for [`GeminiClient`].
#[derive(Clone)]
pub struct GeminiConfig {
    /// API base, e.g. `https://generativelanguage.googleapis.com/v1beta/`.
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Extra attempts after a transport failure, 429 or 5xx.
    pub max_retries: u32,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GeminiConfig {
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("GEMINI_API_KEY must be set"))?;
        Ok(Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key,
            timeout: settings.timeout,
            max_retries: settings.max_retries,
        })
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    agent: ureq::Agent,
    url: Url,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let url = generate_url(&config.endpoint, &config.model, &config.api_key)?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent, url })
    }

    fn post_once(&self, body: &Value) -> std::result::Result<String, Attempt> {
        match self.agent.post(self.url.as_str()).send_json(body.clone()) {
            Ok(response) => {
                let reply: GenerateReply = response
                    .into_json()
                    .map_err(|e| Attempt::Fatal(anyhow!("unreadable model reply: {}", e)))?;
                Ok(reply.text())
            }
            Err(ureq::Error::Status(code, response)) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|body| service_error_message(&body))
                    .unwrap_or_else(|| "no error message".to_string());
                let err = anyhow!("model service returned HTTP {}: {}", code, message);
                if retryable(code) {
                    Err(Attempt::Retryable(err))
                } else {
                    Err(Attempt::Fatal(err))
                }
            }
            Err(ureq::Error::Transport(transport)) => Err(Attempt::Retryable(anyhow!(
                "model service unreachable: {}",
                transport
            ))),
        }
    }
}

/// Rate limiting and server-side failures are worth another attempt; any
/// other status is final.
fn retryable(code: u16) -> bool {
    code == 429 || (500..600).contains(&code)
}

enum Attempt {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl ModelClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn generate(&mut self, request: &ModelRequest) -> Result<String> {
        let body = request_body(request);
        let mut attempt = 0u32;
        loop {
            match self.post_once(&body) {
                Ok(text) => {
                    log::debug!("{} replied with {} bytes of text", self.config.model, text.len());
                    return Ok(text);
                }
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retryable(err)) => {
                    if attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                    log::warn!(
                        "{} (retry {}/{} in {:?})",
                        err,
                        attempt + 1,
                        self.config.max_retries,
                        delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

fn generate_url(endpoint: &str, model: &str, api_key: &str) -> Result<Url> {
    let mut base = Url::parse(endpoint).with_context(|| format!("invalid endpoint {}", endpoint))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base
        .join(&format!("models/{}:generateContent", model))
        .context("build generateContent url")?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

fn request_body(request: &ModelRequest) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&request.image);
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": request.mime_type, "data": encoded } },
                { "text": request.prompt }
            ]
        }]
    })
}

#[derive(Debug, Default, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

impl GenerateReply {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn service_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

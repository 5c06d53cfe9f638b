use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChatRequest, ChatResponse, ChatUsage, LlmClient, LlmError, Message, RetryPolicy};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenAiAuthScheme {
    #[default]
    Bearer,
    /// Azure-style `api-key` header.
    ApiKeyHeader,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub auth_scheme: OpenAiAuthScheme,
    /// Sent as the `api-version` query parameter when set.
    pub api_version: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            organization: None,
            request_timeout_ms: 120_000,
            retry: RetryPolicy::default(),
            auth_scheme: OpenAiAuthScheme::default(),
            api_version: None,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        match base.ends_with("/chat/completions") {
            true => base.to_string(),
            false => format!("{base}/chat/completions"),
        }
    }

    fn default_headers(&self) -> Result<HeaderMap, LlmError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let mut headers = HeaderMap::new();
        match self.auth_scheme {
            OpenAiAuthScheme::Bearer => {
                headers.insert(AUTHORIZATION, header_value("API key", &format!("Bearer {key}"))?);
            }
            OpenAiAuthScheme::ApiKeyHeader => {
                headers.insert(HeaderName::from_static("api-key"), header_value("API key", key)?);
            }
        }
        if let Some(organization) = &self.organization {
            headers.insert(
                HeaderName::from_static("openai-organization"),
                header_value("organization", organization)?,
            );
        }
        Ok(headers)
    }
}

fn header_value(label: &str, raw: &str) -> Result<HeaderValue, LlmError> {
    let mut value = HeaderValue::from_str(raw)
        .map_err(|error| LlmError::Protocol(format!("{label} is not a valid header value: {error}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .default_headers(config.default_headers()?)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint(),
            config,
        })
    }

    /// One HTTP round trip. `Err` carries the failure plus any `Retry-After` hint.
    async fn attempt(&self, body: &WireRequest<'_>, attempt: usize) -> Result<ChatResponse, (LlmError, Option<u64>)> {
        let request_id = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header("x-lifeline-request-id", format!("lifeline-{}-{request_id}", std::process::id()))
            .header("x-lifeline-retry-attempt", attempt.to_string())
            .json(body);
        if let Some(version) = &self.config.api_version {
            builder = builder.query(&[("api-version", version.as_str())]);
        }

        let response = builder.send().await.map_err(|error| (LlmError::from(error), None))?;
        let status = response.status();
        let hint = retry_after_ms(response.headers());
        let raw = response.text().await.map_err(|error| (LlmError::from(error), None))?;
        if !status.is_success() {
            let error = LlmError::Status {
                status: status.as_u16(),
                body: raw,
            };
            return Err((error, hint));
        }
        decode_response(&raw).map_err(|error| (error, None))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = WireRequest::from(&request);
        let mut schedule = self.config.retry.schedule();
        loop {
            let (error, hint) = match self.attempt(&body, schedule.attempt()).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            let Some(delay) = error.is_transient().then(|| schedule.next_delay(hint)).flatten() else {
                return Err(error);
            };
            tracing::debug!(
                %error,
                attempt = schedule.attempt(),
                delay_ms = delay.as_millis() as u64,
                model = %request.model,
                "retrying chat completion"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Seconds or an HTTP date; a date in the past yields zero.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some(at.signed_duration_since(Utc::now()).num_milliseconds().max(0) as u64)
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> From<&'a ChatRequest> for WireRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            response_format: request
                .json_mode
                .then(|| serde_json::json!({ "type": "json_object" })),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Value,
}

fn decode_response(raw: &str) -> Result<ChatResponse, LlmError> {
    let decoded: WireResponse = serde_json::from_str(raw)?;
    let Some(choice) = decoded.choices.into_iter().next() else {
        return Err(LlmError::Protocol("reply had no choices".to_string()));
    };
    Ok(ChatResponse {
        message: Message::assistant(content_text(choice.message.content)),
        finish_reason: choice.finish_reason,
        usage: decoded.usage.unwrap_or_default(),
    })
}

/// Content arrives either as a string or as typed parts; non-text parts are skipped.
fn content_text(content: Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|part| {
                    matches!(
                        part.get("type").and_then(Value::as_str),
                        None | Some("text") | Some("output_text")
                    )
                })
                .filter_map(|part| part.get("text")?.as_str())
                .collect();
            texts.join("\n")
        }
        other => other.to_string(),
    }
}

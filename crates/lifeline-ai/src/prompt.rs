//! The prompt boundary used by the decomposition engine.
//!
//! `PromptClient` is the single capability the engine depends on: send a
//! prompt with optional system context, get raw text back. `ChatPromptClient`
//! adapts any [`LlmClient`] to it and adds a per-call timeout plus retries on
//! transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::{ChatRequest, LlmClient, LlmError, Message, RetryPolicy};

#[derive(Debug, Error)]
pub enum PromptCallError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("prompt call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model returned an empty completion")]
    EmptyResponse,
}

impl PromptCallError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Llm(error) => error.is_transient(),
            Self::Timeout(_) => true,
            Self::EmptyResponse => false,
        }
    }
}

#[async_trait]
pub trait PromptClient: Send + Sync {
    async fn call(&self, prompt: &str, system_context: &str) -> Result<String, PromptCallError>;
}

#[async_trait]
impl<T: PromptClient + ?Sized> PromptClient for Arc<T> {
    async fn call(&self, prompt: &str, system_context: &str) -> Result<String, PromptCallError> {
        (**self).call(prompt, system_context).await
    }
}

#[derive(Debug, Clone)]
pub struct ChatPromptOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ChatPromptOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: Some(0.7),
            max_tokens: None,
            json_mode: false,
            call_timeout: Duration::from_secs(180),
            retry: RetryPolicy::none(),
        }
    }
}

pub struct ChatPromptClient {
    client: Arc<dyn LlmClient>,
    options: ChatPromptOptions,
}

impl ChatPromptClient {
    pub fn new(client: Arc<dyn LlmClient>, options: ChatPromptOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &ChatPromptOptions {
        &self.options
    }

    fn build_request(&self, prompt: &str, system_context: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !system_context.trim().is_empty() {
            messages.push(Message::system(system_context));
        }
        messages.push(Message::user(prompt));
        ChatRequest {
            model: self.options.model.clone(),
            messages,
            json_mode: self.options.json_mode,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }

    async fn call_once(&self, request: ChatRequest) -> Result<String, PromptCallError> {
        let timeout = self.options.call_timeout;
        let response = tokio::time::timeout(timeout, self.client.complete(request))
            .await
            .map_err(|_| PromptCallError::Timeout(timeout))??;
        let text = response.message.content;
        if text.trim().is_empty() {
            return Err(PromptCallError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl PromptClient for ChatPromptClient {
    async fn call(&self, prompt: &str, system_context: &str) -> Result<String, PromptCallError> {
        let request = self.build_request(prompt, system_context);
        let mut schedule = self.options.retry.schedule();
        loop {
            let error = match self.call_once(request.clone()).await {
                Ok(text) => return Ok(text),
                Err(error) => error,
            };
            let Some(delay) = error.is_transient().then(|| schedule.next_delay(None)).flatten() else {
                return Err(error);
            };
            tracing::debug!(%error, attempt = schedule.attempt(), "retrying prompt call");
            tokio::time::sleep(delay).await;
        }
    }
}

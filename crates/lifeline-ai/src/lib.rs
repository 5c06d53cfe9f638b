//! LLM access for lifeline: chat-completion types, an OpenAI-compatible HTTP
//! client with retry/backoff, and the `PromptClient` boundary consumed by the
//! decomposition engine.
mod openai;
mod prompt;
mod retry;
mod types;

pub use openai::{OpenAiAuthScheme, OpenAiClient, OpenAiConfig};
pub use prompt::{ChatPromptClient, ChatPromptOptions, PromptCallError, PromptClient};
pub use retry::{RetryPolicy, RetrySchedule};
pub use types::{ChatRequest, ChatResponse, ChatUsage, LlmClient, LlmError, Message, MessageRole};

//! Brain module: the language-model seam used by every LLM-backed collaborator.
//!
//! [`LlmProvider`] is the transport trait implemented by the HTTP providers and by
//! [`MockLlmProvider`]. [`Brain`] wraps a provider with the shared LLM throttle,
//! transient-error retry and token accounting, so planner, drafter, critiquer and
//! editor all share one rate budget.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::throttle::Throttle;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};

/// Throttle key shared by all language-model calls.
pub const LLM_THROTTLE_KEY: &str = "llm";

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Throttled, retrying front end to an [`LlmProvider`].
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    throttle: Arc<Throttle>,
    retry: RetryConfig,
    temperature: f32,
    max_tokens: usize,
    total_usage: Mutex<TokenUsage>,
    cancel: CancellationToken,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            throttle: Arc::new(Throttle::new(LLM_THROTTLE_KEY, config.throttle)),
            retry: config.retry.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            total_usage: Mutex::new(TokenUsage::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon calls still waiting for the LLM throttle once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Token usage accumulated over every successful call.
    pub fn total_usage(&self) -> TokenUsage {
        *self
            .total_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request. Each attempt (including retries) takes its own throttle
    /// permit, so spacing applies to every call that reaches the provider.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let request = CompletionRequest {
            max_tokens: request.max_tokens.or(Some(self.max_tokens)),
            ..request
        };

        let response = with_retry(&self.retry, || {
            let request = request.clone();
            async move {
                let _permit = self
                    .throttle
                    .acquire(&self.cancel)
                    .await
                    .map_err(|_| LlmError::Cancelled)?;
                self.provider.complete(request).await
            }
        })
        .await?;

        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LLM call completed"
        );
        self.total_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accumulate(&response.usage);
        Ok(response)
    }

    /// Convenience for a system + user prompt pair returning the text answer.
    pub async fn ask(
        &self,
        system: &str,
        prompt: &str,
        temperature: f32,
        json_output: bool,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(prompt)],
            temperature,
            json_output,
            ..Default::default()
        };
        let response = self.complete(request).await?;
        Ok(response.text().trim().to_string())
    }
}

/// A mock LLM provider for testing.
///
/// Responses (or errors) are returned in queue order; every request is recorded.
/// When the queue is empty a fixed placeholder text is returned.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that returns the given texts in order.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for text in texts {
            provider.queue_response(Self::text_response(text.as_ref()));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push_back(Err(error));
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.lock_responses().pop_front().unwrap_or_else(|| {
            Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            ))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

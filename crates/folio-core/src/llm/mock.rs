//! Mock LLM client for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{LlmClient, LlmError};

/// A configurable reply for [`MockLlm`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Successful completion with this text.
    Text(String),
    /// Simulate a 429 rate-limit response.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate an HTTP error status.
    Api(u16, String),
    /// Simulate a connection failure.
    Network(String),
}

type Responder = Box<dyn Fn(&str) -> MockReply + Send + Sync>;

/// A hand-rolled mock implementing [`LlmClient`] for tests.
///
/// Supports:
/// - A fixed reply (used for every call), **or**
/// - A sequence of replies (one per call, repeating the last if exhausted), **or**
/// - A responder closure that picks the reply from the prompt.
/// - Optional per-call latency.
/// - Call counting and prompt capture.
pub struct MockLlm {
    replies: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    responder: Option<Responder>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    /// Create a mock that always replies with `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            fallback: reply,
            responder: None,
            delay: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always replies with `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MockReply::Text(text.into()))
    }

    /// Create a mock that replies in order, repeating the last reply.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        // Reversed so pop() yields the next reply.
        replies.reverse();
        let fallback = replies[0].clone();
        Self {
            replies: Mutex::new(replies),
            ..Self::new(fallback)
        }
    }

    /// Create a mock whose reply depends on the prompt.
    pub fn responder(f: impl Fn(&str) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::new(MockReply::Text(String::new()))
        }
    }

    /// Set simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `complete()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        if let Some(responder) = &self.responder {
            return responder(prompt);
        }
        let mut seq = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl LlmClient for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let reply = self.next_reply(prompt);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match reply {
                MockReply::Text(text) => Ok(text),
                MockReply::RateLimited { retry_after } => Err(LlmError::RateLimited { retry_after }),
                MockReply::Api(status, message) => Err(LlmError::Api { status, message }),
                MockReply::Network(message) => Err(LlmError::Network(message)),
            }
        })
    }
}

/// Mock LLM for tests and test mode.
///
/// Replies are taken from a scripted queue; once the queue is empty the mock
/// echoes the user message. Every request is recorded for later inspection.
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerateRequest, GenerateResponse, LlmClient, LlmError};

enum Scripted {
    Reply(GenerateResponse),
    Fail(String),
}

#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockLlm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text reply.
    #[must_use]
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(GenerateResponse::text(text)));
        self
    }

    /// Queue a full response, including function calls.
    #[must_use]
    pub fn with_response(self, response: GenerateResponse) -> Self {
        self.push(Scripted::Reply(response));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(LlmError::Api {
                status: 500,
                message,
            }),
            None => Ok(GenerateResponse::text(format!(
                "[mock] {}",
                request.message
            ))),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use abrigo_core::completion::{CompletionProvider, CompletionRequest};
use abrigo_core::errors::CompletionError;

/// A scripted reply for [`MockCompletion`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(CompletionError),
    /// Wait, then produce the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider that replays scripted replies in order and records every request.
///
/// Once the script runs out, the fallback reply (if any) repeats; without one
/// the call fails with `InvalidRequest`.
pub struct MockCompletion {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockCompletion {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Always answer with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![]).with_fallback(MockReply::text(text))
    }

    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.script.lock().pop_front().or_else(|| self.fallback.clone());
        let Some(mut reply) = next else {
            return Err(CompletionError::InvalidRequest(format!(
                "MockCompletion: no reply scripted for call {idx}"
            )));
        };

        loop {
            match reply {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::completion::ModelTier;
    use abrigo_core::messages::Turn;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("sys", vec![Turn::user(text)], ModelTier::Standard)
    }

    #[tokio::test]
    async fn replays_in_order() {
        let mock = MockCompletion::new(vec![MockReply::text("um"), MockReply::text("dois")]);
        assert_eq!(mock.complete(&request("a")).await.unwrap(), "um");
        assert_eq!(mock.complete(&request("b")).await.unwrap(), "dois");
        assert!(mock.complete(&request("c")).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockCompletion::always("ok");
        mock.complete(&request("primeira")).await.unwrap();
        mock.complete(&request("segunda")).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].turns[0].content, "primeira");
        assert_eq!(mock.last_request().unwrap().turns[0].content, "segunda");
    }

    #[tokio::test]
    async fn scripted_error() {
        let mock = MockCompletion::new(vec![MockReply::Error(CompletionError::ProviderOverloaded)]);
        assert!(matches!(
            mock.complete(&request("x")).await,
            Err(CompletionError::ProviderOverloaded)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_waits_before_reply() {
        let mock = MockCompletion::new(vec![MockReply::delayed(
            Duration::from_secs(30),
            MockReply::text("late"),
        )]);
        let started = tokio::time::Instant::now();
        assert_eq!(mock.complete(&request("x")).await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn script_before_fallback() {
        let mock = MockCompletion::new(vec![MockReply::text("first")]).with_fallback(MockReply::text("rest"));
        mock.push(MockReply::text("second"));
        assert_eq!(mock.complete(&request("x")).await.unwrap(), "first");
        assert_eq!(mock.complete(&request("x")).await.unwrap(), "second");
        assert_eq!(mock.complete(&request("x")).await.unwrap(), "rest");
        assert_eq!(mock.complete(&request("x")).await.unwrap(), "rest");
    }
}

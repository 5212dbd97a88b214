//! The LLM call boundary.
//!
//! The engine only ever talks to a model through [`ChatClient`], which
//! returns an ordered stream of text chunks. A missing model is the
//! fixed, non-retryable failure "no model available".

pub mod claude;

pub use claude::ClaudeCliClient;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("no model available")]
    NoModelAvailable,

    #[error("chat transport error: {0}")]
    Transport(String),
}

/// One two-part chat call: system instructions plus user content.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub model_hint: Option<String>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, request: ChatRequest) -> Result<ChunkStream, ChatError>;
}

/// Scripted chat client for tests. Each queued script answers one call,
/// in order; the last script repeats once the queue is exhausted.
#[derive(Clone, Default)]
pub struct MockChatClient {
    scripts: Arc<Mutex<Vec<Result<Vec<String>, ChatError>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, chunks: &[&str]) {
        self.scripts
            .lock()
            .unwrap()
            .push(Ok(chunks.iter().map(|c| c.to_string()).collect()));
    }

    pub fn fail_with(&self, error: ChatError) {
        self.scripts.lock().unwrap().push(Err(error));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn send(&self, request: ChatRequest) -> Result<ChunkStream, ChatError> {
        self.requests.lock().unwrap().push(request);

        let mut scripts = self.scripts.lock().unwrap();
        let script = if scripts.len() > 1 {
            scripts.remove(0)
        } else {
            scripts
                .first()
                .cloned()
                .unwrap_or_else(|| Err(ChatError::NoModelAvailable))
        };

        let chunks = script?;
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

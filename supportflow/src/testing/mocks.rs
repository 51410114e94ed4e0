//! Mock stages, backends and transports for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::directory::CustomerDirectory;
use crate::errors::{GenerationError, ToolError};
use crate::generation::{GenerationBackend, GenerationReply, GenerationRequest};
use crate::stages::Stage;
use crate::tools::{LocalTransport, RpcRequest, ToolTransport};

/// A mock stage that records calls and returns a configurable output.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    kind: StageKind,
    output: Mutex<StageOutput>,
    call_count: AtomicUsize,
    seen_states: Mutex<Vec<Vec<String>>>,
}

impl MockStage {
    /// Creates a new mock stage with a success output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Work,
            output: Mutex::new(StageOutput::ok_empty()),
            call_count: AtomicUsize::new(0),
            seen_states: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock stage returning `output`.
    #[must_use]
    pub fn returning(name: impl Into<String>, output: StageOutput) -> Self {
        let stage = Self::new(name);
        stage.set_output(output);
        stage
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the output to return.
    pub fn set_output(&self, output: StageOutput) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Returns the sorted state keys visible on each call.
    #[must_use]
    pub fn seen_states(&self) -> Vec<Vec<String>> {
        self.seen_states.lock().clone()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut keys = ctx.state().keys();
        keys.sort();
        self.seen_states.lock().push(keys);
        self.output.lock().clone()
    }
}

/// A stage that sleeps before succeeding.
///
/// It does not watch the cancellation token itself, so it exercises the
/// executor's own cancellation and deadline handling.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    completed: AtomicUsize,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Returns how many executions ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext<'_>) -> StageOutput {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        StageOutput::ok_value("done")
    }
}

/// A generation backend that replays scripted replies and records requests.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<GenerationReply, GenerationError>>>,
    repeat: Option<GenerationReply>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Creates a backend that answers with `replies` in order.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = GenerationReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Creates a backend that answers every request with `reply`.
    #[must_use]
    pub fn repeating(reply: GenerationReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::default()
        }
    }

    /// Creates a backend whose first answer is an error.
    #[must_use]
    pub fn failing(error: GenerationError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(error)])),
            ..Self::default()
        }
    }

    /// Queues another reply.
    pub fn push(&self, reply: GenerationReply) {
        self.replies.lock().push_back(Ok(reply));
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply, GenerationError> {
        self.requests.lock().push(request);
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        self.repeat
            .clone()
            .ok_or_else(|| GenerationError::InvalidResponse("script exhausted".to_string()))
    }
}

/// A transport that fails a fixed number of sends, then serves the sample
/// customer directory in-process.
#[derive(Debug)]
pub struct FlakyTransport {
    failures_left: AtomicUsize,
    error: ToolError,
    sends: AtomicUsize,
    inner: LocalTransport,
}

impl FlakyTransport {
    /// Fails the first `failures` sends with `error`.
    #[must_use]
    pub fn failing(failures: usize, error: ToolError) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            error,
            sends: AtomicUsize::new(0),
            inner: LocalTransport::new(Arc::new(CustomerDirectory::with_sample_data())),
        }
    }

    /// Returns the number of sends attempted.
    #[must_use]
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for FlakyTransport {
    async fn send(&self, request: &RpcRequest, bearer: &str, timeout: Duration) -> Result<Value, ToolError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(self.error.clone());
        }
        self.inner.send(request, bearer, timeout).await
    }
}

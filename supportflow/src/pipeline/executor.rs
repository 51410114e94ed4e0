//! Sequential, branch-aware pipeline execution.

use super::{Pipeline, StageSpec, Step};
use crate::cancellation::CancellationToken;
use crate::context::{Services, StageContext};
use crate::core::{StageOutput, StageStatus};
use crate::errors::{FailureDescriptor, FailureKind};
use crate::events::{EventSink, EventType, LoggingEventSink, SessionEvent};
use crate::observability::{session_span, stage_span, SpanTimer};
use crate::state::{Session, SessionRegistry, SessionStatus, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

/// The result of a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// The session id.
    pub session_id: String,
    /// The value under the pipeline's output key.
    pub output: Value,
    /// Stages that ran to completion, in order.
    pub stages_run: Vec<String>,
    /// Final session state.
    pub state: StateStore,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// Runs pipelines for any number of concurrent sessions.
///
/// One session runs its stages strictly in order. Different sessions share
/// the executor's [`Services`] and may run in parallel.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    services: Arc<Services>,
    event_sink: Arc<dyn EventSink>,
    session_timeout: Option<Duration>,
    registry: Arc<SessionRegistry>,
}

enum StageRun {
    Finished(StageOutput),
    DeadlineExceeded,
}

impl PipelineExecutor {
    /// Creates an executor that logs events and has no session timeout.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            event_sink: Arc::new(LoggingEventSink::default()),
            session_timeout: None,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Bounds each session's wall-clock time.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Shares a session registry with other executors.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// The shared services.
    #[must_use]
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Creates a session, runs it and releases its id.
    ///
    /// # Errors
    ///
    /// Returns a `Conflict` descriptor if `session_id` is already running,
    /// and otherwise whatever [`PipelineExecutor::run`] returns.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        session_id: impl Into<String>,
        initial_state: StateStore,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, FailureDescriptor> {
        let mut session = Session::with_id(session_id, initial_state);
        let _guard = self.registry.begin(&session.id).map_err(|e| {
            FailureDescriptor::new(&session.id, &pipeline.name, FailureKind::Conflict, e.to_string())
        })?;
        self.run(&mut session, pipeline, cancel).await
    }

    /// Runs `pipeline` over `session`.
    ///
    /// # Errors
    ///
    /// Returns the descriptor of the first stage that failed, was cancelled
    /// or ran past the session deadline.
    pub async fn run(
        &self,
        session: &mut Session,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, FailureDescriptor> {
        let span = session_span(&pipeline.name, &session.id);
        self.run_inner(session, pipeline, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        session: &mut Session,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, FailureDescriptor> {
        let timer = SpanTimer::start(&pipeline.name);
        let deadline = self.session_timeout.map(|timeout| Instant::now() + timeout);
        let mut stages_run = Vec::new();

        info!(pipeline = %pipeline.name, stages = pipeline.stage_names().len(), "Session started");
        self.emit(SessionEvent::new(EventType::SessionStarted, &session.id).with_data(json!({
            "pipeline": pipeline.name,
        })));

        let result = self
            .run_steps(session, pipeline, cancel, deadline, &mut stages_run)
            .await
            .and_then(|()| {
                session.state.get(&pipeline.output_key).cloned().ok_or_else(|| {
                    FailureDescriptor::new(
                        &session.id,
                        &pipeline.name,
                        FailureKind::Configuration,
                        format!("Pipeline output key '{}' was never written", pipeline.output_key),
                    )
                })
            });

        match result {
            Ok(output) => {
                session.status = SessionStatus::Completed;
                let duration_ms = timer.elapsed_ms();
                info!(duration_ms, stages_run = stages_run.len(), "Session completed");
                self.emit(SessionEvent::new(EventType::SessionCompleted, &session.id).with_data(json!({
                    "duration_ms": duration_ms,
                    "stages_run": stages_run,
                })));
                Ok(SessionOutcome {
                    session_id: session.id.clone(),
                    output,
                    stages_run,
                    state: session.state.clone(),
                    duration_ms,
                })
            }
            Err(descriptor) => {
                session.status = SessionStatus::Failed(descriptor.stage.clone());
                warn!(stage = %descriptor.stage, kind = %descriptor.kind, message = %descriptor.message, "Session failed");
                self.emit(
                    SessionEvent::new(EventType::SessionFailed, &session.id)
                        .with_stage(&descriptor.stage)
                        .with_data(json!(descriptor.to_dict())),
                );
                Err(descriptor)
            }
        }
    }

    async fn run_steps(
        &self,
        session: &mut Session,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        stages_run: &mut Vec<String>,
    ) -> Result<(), FailureDescriptor> {
        for step in &pipeline.steps {
            match step {
                Step::Stage(spec) => {
                    self.run_stage(session, spec, cancel, deadline, stages_run).await?;
                }
                Step::Branch { decision, branches } => {
                    let output = self.run_stage(session, decision, cancel, deadline, stages_run).await?;
                    let Some(route) = output.route else {
                        return Err(FailureDescriptor::new(
                            &session.id,
                            &decision.name,
                            FailureKind::Routing,
                            "Decision stage produced no route",
                        ));
                    };
                    let Some(branch) = branches.get(&route.next_stage) else {
                        let known: Vec<&str> = branches.keys().map(String::as_str).collect();
                        return Err(FailureDescriptor::new(
                            &session.id,
                            &decision.name,
                            FailureKind::Routing,
                            format!(
                                "Unknown route '{}' (expected one of: {})",
                                route.next_stage,
                                known.join(", ")
                            ),
                        )
                        .with_raw(serde_json::to_string(&route).unwrap_or_default()));
                    };

                    info!(stage = %decision.name, next_stage = %route.next_stage, "Route selected");
                    self.emit(
                        SessionEvent::new(EventType::RouteSelected, &session.id)
                            .with_stage(&decision.name)
                            .with_data(json!({"next_stage": route.next_stage})),
                    );

                    for spec in branch {
                        self.run_stage(session, spec, cancel, deadline, stages_run).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        session: &mut Session,
        spec: &StageSpec,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        stages_run: &mut Vec<String>,
    ) -> Result<StageOutput, FailureDescriptor> {
        let fail = |kind: FailureKind, message: String| {
            FailureDescriptor::new(&session.id, &spec.name, kind, message)
        };

        if cancel.is_cancelled() {
            return Err(fail(FailureKind::Cancelled, cancel.reason_or_default()));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(fail(FailureKind::Timeout, self.timeout_message()));
        }
        let missing: Vec<&str> = spec
            .required_inputs
            .iter()
            .filter(|key| !session.state.contains_key(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let descriptor = fail(
                FailureKind::Configuration,
                format!("Missing required state: {}", missing.join(", ")),
            );
            self.emit_stage_failed(&descriptor);
            return Err(descriptor);
        }

        session.status = SessionStatus::Running(spec.name.clone());
        self.emit(SessionEvent::new(EventType::StageStarted, &session.id).with_stage(&spec.name));
        let timer = SpanTimer::start(&spec.name);

        let run = {
            let ctx = StageContext::new(&session.id, spec, &session.state, &self.services, cancel);
            tokio::select! {
                biased;
                () = cancel.cancelled() => StageRun::Finished(StageOutput::cancel(cancel.reason_or_default())),
                () = wait_until(deadline) => StageRun::DeadlineExceeded,
                output = spec.runner.execute(&ctx).instrument(stage_span(&spec.name, spec.kind)) => {
                    StageRun::Finished(output)
                }
            }
        };

        let output = match run {
            StageRun::DeadlineExceeded => {
                let descriptor = fail(FailureKind::Timeout, self.timeout_message());
                self.emit_stage_failed(&descriptor);
                return Err(descriptor);
            }
            StageRun::Finished(output) => output,
        };

        if output.status != StageStatus::Ok {
            let (kind, message, raw) = match &output.failure {
                Some(failure) => (failure.kind, failure.message.clone(), failure.raw.clone()),
                None if output.status == StageStatus::Cancel => {
                    (FailureKind::Cancelled, cancel.reason_or_default(), None)
                }
                None => (FailureKind::Configuration, "Stage failed without details".to_string(), None),
            };
            let mut descriptor = fail(kind, message);
            descriptor.raw = raw;
            self.emit_stage_failed(&descriptor);
            return Err(descriptor);
        }

        if let Some(key) = &spec.output_key {
            let Some(value) = &output.value else {
                let descriptor = fail(
                    FailureKind::Configuration,
                    format!("Stage declares output key '{key}' but produced no value"),
                );
                self.emit_stage_failed(&descriptor);
                return Err(descriptor);
            };
            session.state.set(key.clone(), value.clone());
        }

        let duration_ms = timer.elapsed_ms();
        for (key, value) in &output.writes {
            session.state.set(key.clone(), value.clone());
        }
        stages_run.push(spec.name.clone());

        info!(stage = %spec.name, duration_ms, "Stage completed");
        self.emit(
            SessionEvent::new(EventType::StageCompleted, &session.id)
                .with_stage(&spec.name)
                .with_data(json!({"duration_ms": duration_ms, "kind": spec.kind})),
        );
        Ok(output)
    }

    fn timeout_message(&self) -> String {
        let ms = self.session_timeout.map_or(0, |t| t.as_millis());
        format!("Session exceeded its {ms}ms budget")
    }

    fn emit_stage_failed(&self, descriptor: &FailureDescriptor) {
        warn!(stage = %descriptor.stage, kind = %descriptor.kind, message = %descriptor.message, "Stage failed");
        self.emit(
            SessionEvent::new(EventType::StageFailed, &descriptor.session_id)
                .with_stage(&descriptor.stage)
                .with_data(json!({"kind": descriptor.kind, "message": descriptor.message})),
        );
    }

    fn emit(&self, event: SessionEvent) {
        self.event_sink.try_emit(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RoutingResult, StageKind};
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::Stage;
    use crate::testing::{assert_failure_kind, MockStage, SlowStage};
    use pretty_assertions::assert_eq;

    fn spec(name: &str, stage: Arc<dyn Stage>) -> StageSpec {
        StageSpec::new(name, stage)
    }

    fn executor(sink: Arc<CollectingEventSink>) -> PipelineExecutor {
        PipelineExecutor::new(Arc::new(Services::new())).with_event_sink(sink)
    }

    #[tokio::test]
    async fn test_sequential_stages_apply_writes_in_order() {
        let first = Arc::new(MockStage::returning(
            "first",
            StageOutput::ok_value("one").with_write("extra", 1),
        ));
        let second = Arc::new(MockStage::returning("second", StageOutput::ok_value("two")));
        let pipeline = PipelineBuilder::new("seq")
            .stage(spec("first", first.clone()).with_output_key("a"))
            .stage(
                spec("second", second.clone())
                    .with_required_inputs(["a", "extra"])
                    .with_output_key("b"),
            )
            .output_key("b")
            .build()
            .unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let outcome = executor(sink.clone())
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.output, json!("two"));
        assert_eq!(outcome.stages_run, vec!["first", "second"]);
        assert_eq!(second.seen_states(), vec![vec!["a".to_string(), "extra".to_string()]]);
        assert_eq!(
            sink.types(),
            vec![
                "session.started",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "session.completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_required_input_is_configuration() {
        let stage = Arc::new(MockStage::new("needs"));
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("needs", stage.clone()).with_required_inputs(["PROMPT"]).with_output_key("out"))
            .output_key("out")
            .build()
            .unwrap();

        let result = executor(Arc::new(CollectingEventSink::new()))
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Configuration);
        assert!(descriptor.message.contains("PROMPT"));
        assert_eq!(stage.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_halts_pipeline() {
        let failing = Arc::new(MockStage::returning("bad", StageOutput::fail(FailureKind::Transport, "down")));
        let after = Arc::new(MockStage::new("after"));
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("bad", failing))
            .stage(spec("after", after.clone()).with_output_key("out"))
            .output_key("out")
            .build()
            .unwrap();

        let mut session = Session::with_id("s1", StateStore::new());
        let result = executor(Arc::new(CollectingEventSink::new()))
            .run(&mut session, &pipeline, &CancellationToken::new())
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Transport);
        assert_eq!(descriptor.stage, "bad");
        assert_eq!(after.call_count(), 0);
        assert_eq!(session.status, SessionStatus::Failed("bad".to_string()));
    }

    #[tokio::test]
    async fn test_only_chosen_branch_runs() {
        let router = Arc::new(
            MockStage::returning(
                "router",
                StageOutput::routed(RoutingResult::new("support", json!({"why": "general"}))),
            )
            .with_kind(StageKind::Route),
        );
        let data = Arc::new(MockStage::returning("data", StageOutput::ok_value("data")));
        let support = Arc::new(MockStage::returning("support", StageOutput::ok_value("help")));
        let pipeline = PipelineBuilder::new("routed")
            .branch(
                spec("router", router).with_output_key("route"),
                [
                    ("customer_data", vec![spec("data", data.clone()).with_output_key("reply")]),
                    ("support", vec![spec("support", support.clone()).with_output_key("reply")]),
                ],
            )
            .output_key("reply")
            .build()
            .unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let outcome = executor(sink.clone())
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.output, json!("help"));
        assert_eq!(outcome.state.get("route"), Some(&json!({"why": "general"})));
        assert_eq!(data.call_count(), 0);
        assert_eq!(support.call_count(), 1);
        assert!(sink.types().contains(&"route.selected"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_routing_failure() {
        let router = Arc::new(
            MockStage::returning("router", StageOutput::routed(RoutingResult::new("billing", json!({}))))
                .with_kind(StageKind::Route),
        );
        let pipeline = PipelineBuilder::new("routed")
            .branch(
                spec("router", router),
                [("support", vec![spec("support", Arc::new(MockStage::new("support")))])],
            )
            .output_key("reply")
            .build()
            .unwrap();

        let result = executor(Arc::new(CollectingEventSink::new()))
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Routing);
        assert!(descriptor.raw.as_deref().unwrap().contains("billing"));
    }

    #[tokio::test]
    async fn test_cancel_before_first_stage() {
        let stage = Arc::new(MockStage::new("only"));
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("only", stage.clone()).with_output_key("out"))
            .output_key("out")
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel("user left");

        let result = executor(Arc::new(CollectingEventSink::new()))
            .execute(&pipeline, "s1", StateStore::new(), &cancel)
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Cancelled);
        assert_eq!(descriptor.message, "user left");
        assert_eq!(stage.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_stage() {
        let slow = Arc::new(SlowStage::with_delay_ms("slow", 5_000));
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("slow", slow.clone()).with_output_key("out"))
            .output_key("out")
            .build()
            .unwrap();
        let cancel = Arc::new(CancellationToken::new());
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel("shutdown");
            })
        };

        let result = executor(Arc::new(CollectingEventSink::new()))
            .execute(&pipeline, "s1", StateStore::new(), &cancel)
            .await;
        canceller.await.unwrap();

        assert_failure_kind(&result, FailureKind::Cancelled);
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test]
    async fn test_session_timeout() {
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("slow", Arc::new(SlowStage::with_delay_ms("slow", 5_000))).with_output_key("out"))
            .output_key("out")
            .build()
            .unwrap();

        let result = executor(Arc::new(CollectingEventSink::new()))
            .with_session_timeout(Some(Duration::from_millis(30)))
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Timeout);
        assert_eq!(descriptor.stage, "slow");
    }

    #[tokio::test]
    async fn test_missing_output_key_is_configuration() {
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("noop", Arc::new(MockStage::new("noop"))))
            .output_key("never")
            .build()
            .unwrap();

        let result = executor(Arc::new(CollectingEventSink::new()))
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await;
        assert_failure_kind(&result, FailureKind::Configuration);
    }

    #[tokio::test]
    async fn test_declared_output_key_requires_value() {
        let quiet = Arc::new(MockStage::returning("quiet", StageOutput::ok_empty().with_write("side", 1)));
        let after = Arc::new(MockStage::new("after"));
        let pipeline = PipelineBuilder::new("p")
            .stage(spec("quiet", quiet.clone()).with_output_key("out"))
            .stage(spec("after", after.clone()))
            .output_key("out")
            .build()
            .unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let result = executor(sink.clone())
            .execute(&pipeline, "s1", StateStore::new(), &CancellationToken::new())
            .await;

        let descriptor = assert_failure_kind(&result, FailureKind::Configuration);
        assert_eq!(descriptor.stage, "quiet");
        assert!(descriptor.message.contains("'out'"));
        assert_eq!(quiet.call_count(), 1);
        assert_eq!(after.call_count(), 0);
        assert!(sink.types().contains(&"stage.failed"));
    }

    #[tokio::test]
    async fn test_duplicate_session_id_conflicts() {
        let pipeline = Arc::new(
            PipelineBuilder::new("p")
                .stage(spec("slow", Arc::new(SlowStage::with_delay_ms("slow", 200))).with_output_key("out"))
                .output_key("out")
                .build()
                .unwrap(),
        );
        let executor = Arc::new(executor(Arc::new(CollectingEventSink::new())));

        let first = {
            let (executor, pipeline) = (executor.clone(), pipeline.clone());
            tokio::spawn(async move {
                executor
                    .execute(&pipeline, "same", StateStore::new(), &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = executor
            .execute(&pipeline, "same", StateStore::new(), &CancellationToken::new())
            .await;
        assert_failure_kind(&second, FailureKind::Conflict);

        assert!(first.await.unwrap().is_ok());
        assert!(!executor.registry().is_active("same"));
    }
}

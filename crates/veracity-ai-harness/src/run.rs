use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::content::{InputPart, RunOutput};
use crate::errors::{HarnessError, RunFailure, run_failure_from_provider_error};
use crate::harness::ProviderRegistry;
use crate::model::{ModelRef, ProviderId};
use crate::provider::{CompletionMeta, ProviderAdapter, ProviderEvent, ProviderRequest};
use crate::stream::StreamEvent;

const DEFAULT_BUFFER_CAPACITY: usize = 128;

/// Handle used to request cancellation of a running stream.
///
/// Cancellation is best-effort and becomes visible as a terminal
/// `StreamEvent::Error` with `RunFailure::Cancelled`.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Configures a single model run before it is started.
///
/// Obtained from `Session::run`; add prompt content and options, then call
/// `start_stream` for event-by-event consumption or `collect_text` for a
/// one-shot result.
pub struct RunBuilder {
    registry: Arc<ProviderRegistry>,
    session_id: uuid::Uuid,
    session_label: String,
    model: ModelRef,
    system_prompt: Option<String>,
    input_parts: Vec<InputPart>,
    timeout: Option<Duration>,
    buffer_capacity: usize,
    vendor_options: HashMap<ProviderId, serde_json::Value>,
}

impl RunBuilder {
    pub(crate) fn new(
        registry: Arc<ProviderRegistry>,
        session_id: uuid::Uuid,
        session_label: String,
        model: ModelRef,
    ) -> Self {
        Self {
            registry,
            session_id,
            session_label,
            model,
            system_prompt: None,
            input_parts: Vec::new(),
            timeout: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            vendor_options: HashMap::new(),
        }
    }

    /// Sets the system prompt for the run.
    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }

    /// Appends a plain text user input part.
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.input_parts.push(InputPart::Text(text.into()));
        self
    }

    /// Appends a JSON user input part.
    pub fn user_json(mut self, value: serde_json::Value) -> Self {
        self.input_parts.push(InputPart::Json(value));
        self
    }

    /// Replaces all input parts with the provided list.
    pub fn input_parts(mut self, parts: Vec<InputPart>) -> Self {
        self.input_parts = parts;
        self
    }

    /// Sets an optional per-run timeout, applied to the provider request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the bounded event buffer size between the run task and the
    /// consumer.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub(crate) fn set_vendor_options_json(
        mut self,
        provider: ProviderId,
        value: serde_json::Value,
    ) -> Self {
        self.vendor_options.insert(provider, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn vendor_options_value(&self, provider: &ProviderId) -> Option<&serde_json::Value> {
        self.vendor_options.get(provider)
    }

    /// Validates the builder state and starts a streaming run.
    ///
    /// The returned `RunStream` yields `RunStarted`, zero or more
    /// `OutputDelta`s, and exactly one terminal `Completed` or `Error`.
    pub async fn start_stream(self) -> Result<RunStream, HarnessError> {
        let registry = self.registry.clone();
        let capacity = self.buffer_capacity;
        let label = self.session_label.clone();
        let request = self.into_request()?;
        let provider = registry
            .get(&request.model.provider)
            .ok_or_else(|| HarnessError::ProviderNotFound {
                provider: request.model.provider.clone(),
            })?;
        debug!(run_id = %request.run_id, session = %label, model = %request.model.model, "starting run");

        let (tx, rx) = mpsc::channel(capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let run_id = request.run_id;
        let session_id = request.session_id;
        let model = request.model.clone();
        tokio::spawn(drive_run(provider, request, tx, final_tx, abort_rx));

        Ok(RunStream {
            run_id,
            session_id,
            model,
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        })
    }

    /// Runs to completion and returns the final output.
    pub async fn collect_output(self) -> Result<RunOutput, HarnessError> {
        let stream = self.start_stream().await?;
        stream.finish().await
    }

    /// Runs to completion and returns the text transcript.
    pub async fn collect_text(self) -> Result<String, HarnessError> {
        Ok(self.collect_output().await?.text)
    }

    fn into_request(self) -> Result<ProviderRequest, HarnessError> {
        if self.model.provider.as_str().trim().is_empty() {
            return Err(HarnessError::Validation(
                "model provider must not be empty".into(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(HarnessError::Validation("model must not be empty".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(HarnessError::Validation(
                "buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.input_parts.is_empty() {
            return Err(HarnessError::Validation(
                "at least one input part is required".into(),
            ));
        }
        for part in &self.input_parts {
            if let InputPart::Text(text) = part
                && text.trim().is_empty()
            {
                return Err(HarnessError::Validation(
                    "text input must not be empty".into(),
                ));
            }
        }

        Ok(ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: self.session_id,
            model: self.model,
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            input_parts: self.input_parts,
            timeout: self.timeout,
            vendor_options: self.vendor_options,
        })
    }
}

/// Streaming handle returned by `RunBuilder::start_stream`.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to
/// obtain the final result after the terminal event.
pub struct RunStream {
    run_id: uuid::Uuid,
    session_id: uuid::Uuid,
    model: ModelRef,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<RunOutput, HarnessError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl RunStream {
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next stream event.
    ///
    /// Returns `None` after the event channel is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(StreamEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains any remaining events and returns the terminal run result.
    ///
    /// Safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<RunOutput, HarnessError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::protocol_msg(format!(
                "run task ended without final result (provider={}, model={})",
                self.model.provider, self.model.model
            ))),
        }
    }
}

/// Growing transcript of provider deltas, turned into the run output once
/// the provider reports completion.
#[derive(Default)]
struct Transcript {
    text: String,
    deltas: u64,
}

impl Transcript {
    /// Appends one delta and returns its sequence number.
    fn push(&mut self, delta: &str) -> u64 {
        let seq = self.deltas;
        self.text.push_str(delta);
        self.deltas += 1;
        seq
    }

    fn into_output(self, meta: CompletionMeta) -> RunOutput {
        RunOutput {
            text: self.text,
            finish_reason: meta.finish_reason,
            usage: meta.usage,
        }
    }
}

/// Sender side of one run: the event channel plus the one-shot final result.
///
/// `resolve` is take-once so the final result cannot be sent twice no matter
/// which exit path the run takes.
struct RunWorker {
    run_id: uuid::Uuid,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: Option<oneshot::Sender<Result<RunOutput, HarnessError>>>,
}

impl RunWorker {
    /// Returns false when the consumer dropped the stream.
    async fn emit(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    fn resolve(&mut self, result: Result<RunOutput, HarnessError>) {
        if let Some(tx) = self.final_tx.take() {
            let _ = tx.send(result);
        }
    }

    async fn fail(&mut self, failure: RunFailure) {
        let _ = self
            .emit(StreamEvent::Error {
                run_id: self.run_id,
                error: failure.clone(),
            })
            .await;
        self.resolve(Err(HarnessError::run_failed(failure)));
    }

    fn abandon(&mut self, context: &str) {
        self.resolve(Err(HarnessError::protocol_msg(format!(
            "run stream receiver dropped {context}"
        ))));
    }
}

async fn drive_run(
    provider: Arc<dyn ProviderAdapter>,
    request: ProviderRequest,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<RunOutput, HarnessError>>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let run_id = request.run_id;
    let provider_id = request.model.provider.clone();
    let mut worker = RunWorker {
        run_id,
        tx,
        final_tx: Some(final_tx),
    };

    let started = worker
        .emit(StreamEvent::RunStarted {
            run_id,
            session_id: request.session_id,
            provider: provider_id.clone(),
            model: request.model.model.clone(),
        })
        .await;
    if !started {
        worker.abandon("before RunStarted");
        return;
    }

    let mut handle = match provider.start_stream(request).await {
        Ok(handle) => handle,
        Err(err) => {
            worker.fail(run_failure_from_provider_error(&err)).await;
            return;
        }
    };

    let mut transcript = Transcript::default();
    let mut listen_for_abort = true;
    loop {
        tokio::select! {
            changed = abort_rx.changed(), if listen_for_abort => {
                match changed {
                    Ok(()) if *abort_rx.borrow() => {
                        worker.fail(RunFailure::Cancelled).await;
                        return;
                    }
                    Ok(()) => {}
                    // Dropping the AbortHandle is not a cancellation.
                    Err(_) => listen_for_abort = false,
                }
            }
            next = handle.stream.next() => {
                match next {
                    Some(Ok(ProviderEvent::TextDelta { text })) => {
                        if text.is_empty() {
                            continue;
                        }
                        let seq = transcript.push(&text);
                        debug!(run_id = %run_id, provider = %provider_id, seq, "provider text delta");
                        if !worker.emit(StreamEvent::OutputDelta { run_id, seq, text }).await {
                            worker.abandon("during output");
                            return;
                        }
                    }
                    Some(Ok(ProviderEvent::Completed(meta))) => {
                        let output = transcript.into_output(meta);
                        if worker.emit(StreamEvent::Completed { run_id, output: output.clone() }).await {
                            worker.resolve(Ok(output));
                        } else {
                            worker.abandon("before completion");
                        }
                        return;
                    }
                    Some(Err(err)) => {
                        worker.fail(run_failure_from_provider_error(&err)).await;
                        return;
                    }
                    None => {
                        worker.fail(RunFailure::Protocol {
                            message: format!("provider stream ended without completion ({provider_id})"),
                        }).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::TokenUsage;
    use crate::errors::ProviderError;
    use crate::provider::{ProviderResponseMeta, ProviderStreamHandle};
    use futures::stream;

    struct FakeProvider {
        id: ProviderId,
        behavior: FakeProviderBehavior,
    }

    enum FakeProviderBehavior {
        ImmediateError(ProviderError),
        Events(Vec<Result<ProviderEvent, ProviderError>>),
        Pending,
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for FakeProvider {
        fn id(&self) -> ProviderId {
            self.id.clone()
        }

        async fn start_stream(
            &self,
            _req: ProviderRequest,
        ) -> Result<ProviderStreamHandle, ProviderError> {
            match &self.behavior {
                FakeProviderBehavior::ImmediateError(err) => Err(err.clone()),
                FakeProviderBehavior::Events(events) => Ok(ProviderStreamHandle {
                    stream: Box::pin(stream::iter(events.clone())),
                    metadata: ProviderResponseMeta::default(),
                }),
                FakeProviderBehavior::Pending => Ok(ProviderStreamHandle {
                    stream: Box::pin(stream::pending()),
                    metadata: ProviderResponseMeta::default(),
                }),
            }
        }
    }

    fn harness_with(behavior: FakeProviderBehavior) -> crate::Harness {
        crate::Harness::builder()
            .register_provider(Arc::new(FakeProvider {
                id: ProviderId::new("fake"),
                behavior,
            }))
            .build()
            .expect("build harness")
    }

    fn builder_with_events(events: Vec<Result<ProviderEvent, ProviderError>>) -> RunBuilder {
        harness_with(FakeProviderBehavior::Events(events))
            .session("test")
            .run(ModelRef::new("fake", "model-a"))
            .user_text("hello")
    }

    fn completed(finish_reason: &str, usage: Option<TokenUsage>) -> ProviderEvent {
        ProviderEvent::Completed(CompletionMeta {
            finish_reason: Some(finish_reason.into()),
            usage,
        })
    }

    #[tokio::test]
    async fn validation_rejects_missing_input() {
        let err = harness_with(FakeProviderBehavior::Events(vec![]))
            .session("s")
            .run(ModelRef::new("fake", "m"))
            .start_stream()
            .await;
        let err = match err {
            Ok(_) => panic!("missing input should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, HarnessError::Validation(msg) if msg.contains("at least one input")));
    }

    #[tokio::test]
    async fn validation_rejects_empty_text_input() {
        let err = builder_with_events(vec![])
            .input_parts(vec![InputPart::Text("   ".into())])
            .start_stream()
            .await;
        let err = match err {
            Ok(_) => panic!("empty text should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, HarnessError::Validation(msg) if msg.contains("text input")));
    }

    #[tokio::test]
    async fn validation_rejects_zero_buffer_capacity() {
        let err = builder_with_events(vec![])
            .buffer_capacity(0)
            .start_stream()
            .await;
        assert!(matches!(err, Err(HarnessError::Validation(_))));
    }

    #[tokio::test]
    async fn delta_free_completion_yields_an_empty_transcript() {
        let mut stream =
            builder_with_events(vec![Ok(completed("end_turn", None))])
                .start_stream()
                .await
                .expect("start");

        let first = stream.next_event().await.expect("first event");
        assert!(matches!(first, StreamEvent::RunStarted { .. }));
        let second = stream.next_event().await.expect("second event");
        assert!(second.is_terminal());

        let output = stream.finish().await.expect("finish");
        assert!(output.text.is_empty());
        assert_eq!(output.finish_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn deltas_are_sequenced_and_aggregated_into_the_transcript() {
        let mut stream = builder_with_events(vec![
            Ok(ProviderEvent::TextDelta { text: "a".into() }),
            Ok(ProviderEvent::TextDelta { text: "b".into() }),
            Ok(completed("end_turn", None)),
        ])
        .start_stream()
        .await
        .expect("start");

        let mut seqs = Vec::new();
        let mut saw_terminal = false;
        while let Some(event) = stream.next_event().await {
            match event {
                StreamEvent::OutputDelta { seq, .. } => seqs.push(seq),
                StreamEvent::Completed { .. } => {
                    saw_terminal = true;
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(seqs, vec![0, 1]);
        assert!(saw_terminal);
        assert_eq!(stream.finish().await.expect("finish").text, "ab");
    }

    #[tokio::test]
    async fn completion_metadata_is_attached_to_the_delta_built_output() {
        let usage = TokenUsage {
            input_tokens: 42,
            output_tokens: 128,
        };
        let output = builder_with_events(vec![
            Ok(ProviderEvent::TextDelta {
                text: "partial".into(),
            }),
            Ok(completed("end_turn", Some(usage))),
        ])
        .collect_output()
        .await
        .expect("collect");

        assert_eq!(output.text, "partial");
        assert_eq!(output.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(output.usage, Some(usage));
        assert_eq!(output.usage.map(|u| u.total()), Some(170));
    }

    #[tokio::test]
    async fn provider_runtime_error_becomes_terminal_error_and_finish_error() {
        let mut stream = builder_with_events(vec![Err(ProviderError::provider(
            "fake",
            "boom",
            Some(500),
        ))])
        .start_stream()
        .await
        .expect("start");

        let mut saw_error = false;
        while let Some(event) = stream.next_event().await {
            if matches!(event, StreamEvent::Error { .. }) {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        assert!(matches!(
            stream.finish().await,
            Err(HarnessError::RunFailed(RunFailure::Provider { .. }))
        ));
    }

    #[tokio::test]
    async fn stream_end_without_completion_is_a_protocol_failure() {
        let mut stream = builder_with_events(vec![Ok(ProviderEvent::TextDelta {
            text: "half".into(),
        })])
        .start_stream()
        .await
        .expect("start");

        let mut saw_error = false;
        while let Some(event) = stream.next_event().await {
            if matches!(
                event,
                StreamEvent::Error {
                    error: RunFailure::Protocol { .. },
                    ..
                }
            ) {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn cancellation_emits_terminal_error() {
        let mut stream = harness_with(FakeProviderBehavior::Pending)
            .session("test")
            .run(ModelRef::new("fake", "model-a"))
            .user_text("hello")
            .start_stream()
            .await
            .expect("start");

        let abort = stream.abort_handle();
        let _ = stream.next_event().await;
        abort.abort();

        let mut saw_cancel = false;
        while let Some(event) = stream.next_event().await {
            if let StreamEvent::Error {
                error: RunFailure::Cancelled,
                ..
            } = event
            {
                saw_cancel = true;
                break;
            }
        }
        assert!(saw_cancel);
        assert!(matches!(
            stream.finish().await,
            Err(HarnessError::RunFailed(RunFailure::Cancelled))
        ));
    }

    #[tokio::test]
    async fn user_json_and_vendor_option_storage_are_preserved() {
        let builder = harness_with(FakeProviderBehavior::ImmediateError(
            ProviderError::transport("fake", "not reached"),
        ))
        .session("test")
        .run(ModelRef::new("fake", "m"))
        .user_json(serde_json::json!({"k":"v"}))
        .set_vendor_options_json(ProviderId::new("fake"), serde_json::json!({"x":1}));

        assert_eq!(
            builder.vendor_options_value(&ProviderId::new("fake")),
            Some(&serde_json::json!({"x":1}))
        );
    }

    #[tokio::test]
    async fn provider_not_found_is_start_time_error() {
        let harness = crate::Harness::builder().build().expect("build harness");
        let err = harness
            .session("s")
            .run(ModelRef::new("missing", "m"))
            .user_text("hello")
            .start_stream()
            .await;
        let err = match err {
            Ok(_) => panic!("missing provider"),
            Err(err) => err,
        };
        assert!(matches!(err, HarnessError::ProviderNotFound { .. }));
    }
}

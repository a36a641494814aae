use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt as _};
use tracing::{debug, warn};

use crate::accumulator::ChunkAccumulator;
use crate::emit::SseEmitter;
use crate::extract::{Extraction, SpeculativeExtractor};

/// One item from the upstream model stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    /// A text fragment; arbitrary size, may split any token or delimiter.
    Delta(String),
    /// End-of-response signal with whatever usage metadata is available.
    Done(SourceUsage),
}

/// Usage metadata reported by the upstream source at end of response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceUsage {
    pub total_tokens: Option<u64>,
    pub model: Option<String>,
}

/// Unrecoverable upstream failure. Not retried at this layer; surfaced as
/// exactly one `error` event.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SourceError {
    pub code: String,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl SourceError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            code: "upstream_failure".into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: "transport_failure".into(),
            message: message.into(),
            retry_after: None,
        }
    }
}

/// Session state machine phases.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Connecting,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

/// Final typed result for a completed session.
///
/// When the terminal parse succeeded, `document` holds the authoritative
/// value and the scores come from it; otherwise everything here is the
/// speculative best-effort state, and `success` is false.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub success: bool,
    pub document: Option<serde_json::Value>,
    pub reality_score: Option<f64>,
    pub integrity_score: Option<f64>,
    pub sections: HashMap<String, serde_json::Value>,
    pub total_tokens: Option<u64>,
    pub duration_seconds: f64,
}

/// Terminal result of driving one session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    Completed(SessionReport),
    Failed { code: String, message: String },
}

const CHUNK_CONTENT_TYPE: &str = "text";
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Drives one model stream end to end: accumulate, extract, emit, finalize.
///
/// Exactly one terminal event (`complete` or `error`) is emitted per session
/// unless the transport itself dies first, in which case the orchestrator
/// stops producing and releases the upstream stream by dropping it.
pub struct StreamOrchestrator {
    emitter: SseEmitter,
    accumulator: ChunkAccumulator,
    extractor: SpeculativeExtractor,
    keepalive_interval: Duration,
    phase: Phase,
}

impl StreamOrchestrator {
    pub fn new(emitter: SseEmitter) -> Self {
        Self {
            emitter,
            accumulator: ChunkAccumulator::new(),
            extractor: SpeculativeExtractor::new(),
            keepalive_interval: DEFAULT_KEEPALIVE,
            phase: Phase::Idle,
        }
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Consumes the upstream stream and runs the session to its terminal
    /// state. Chunk processing is strictly sequential within the session.
    pub async fn run<S>(mut self, source: S) -> SessionOutcome
    where
        S: Stream<Item = Result<SourceEvent, SourceError>>,
    {
        let started = Instant::now();
        futures::pin_mut!(source);

        self.phase = Phase::Connecting;
        if self
            .emitter
            .status("connecting", "contacting model", 0.0)
            .await
            .is_err()
        {
            return self.transport_lost();
        }

        let mut keepalive = tokio::time::interval(self.keepalive_interval);
        keepalive.reset();

        loop {
            tokio::select! {
                item = source.next() => {
                    match item {
                        Some(Ok(SourceEvent::Delta(text))) => {
                            if text.is_empty() {
                                continue;
                            }
                            if let Err(outcome) = self.on_delta(&text).await {
                                return outcome;
                            }
                            keepalive.reset();
                        }
                        Some(Ok(SourceEvent::Done(usage))) => {
                            return self.finalize(usage, started).await;
                        }
                        Some(Err(err)) => {
                            return self.fail(err).await;
                        }
                        None => {
                            let err = SourceError::upstream(
                                "model stream ended without completion signal",
                            );
                            return self.fail(err).await;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if self.emitter.keepalive().await.is_err() {
                        return self.transport_lost();
                    }
                }
            }
        }
    }

    async fn on_delta(&mut self, text: &str) -> Result<(), SessionOutcome> {
        if self.phase == Phase::Connecting {
            self.phase = Phase::Streaming;
            if self
                .emitter
                .status("streaming", "receiving response", 0.2)
                .await
                .is_err()
            {
                return Err(self.transport_lost());
            }
        }

        self.accumulator.append(text);
        if self
            .emitter
            .chunk(CHUNK_CONTENT_TYPE, text, false)
            .await
            .is_err()
        {
            return Err(self.transport_lost());
        }

        // Extraction runs against the full buffer on every chunk; matches may
        // span chunk boundaries.
        let extractions = self.extractor.scan(&mut self.accumulator);
        for extraction in extractions {
            let write = match extraction {
                Extraction::Score(payload) => self.emitter.score(payload).await,
                Extraction::Section(payload) => self.emitter.section(payload).await,
            };
            if write.is_err() {
                return Err(self.transport_lost());
            }
        }
        Ok(())
    }

    async fn finalize(&mut self, usage: SourceUsage, started: Instant) -> SessionOutcome {
        self.phase = Phase::Finalizing;
        let document = self.extractor.finalize(&self.accumulator);
        let success = document.is_some();
        let duration = started.elapsed().as_secs_f64();
        debug!(success, duration, "session finalizing");

        if self
            .emitter
            .complete(success, usage.total_tokens, Some(duration))
            .await
            .is_err()
        {
            return self.transport_lost();
        }

        self.phase = Phase::Completed;
        let (reality_score, integrity_score) = self.extractor.scores();
        SessionOutcome::Completed(SessionReport {
            success,
            document,
            reality_score,
            integrity_score,
            sections: self.extractor.sections().clone(),
            total_tokens: usage.total_tokens,
            duration_seconds: duration,
        })
    }

    async fn fail(&mut self, err: SourceError) -> SessionOutcome {
        self.phase = Phase::Failed;
        warn!(code = %err.code, message = %err.message, "session failed");
        // Best effort: if the transport is already gone there is nobody left
        // to tell, and no complete event may follow either way.
        let _ = self
            .emitter
            .error(&err.code, &err.message, err.retry_after)
            .await;
        SessionOutcome::Failed {
            code: err.code,
            message: err.message,
        }
    }

    fn transport_lost(&mut self) -> SessionOutcome {
        self.phase = Phase::Failed;
        debug!("event transport closed, stopping session");
        SessionOutcome::Failed {
            code: "transport_failure".into(),
            message: "event stream transport closed".into(),
        }
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::event::{
    ChunkPayload, CompletePayload, ErrorPayload, EventKind, ScorePayload, SectionPayload,
    StatusPayload, StreamEvent,
};
use crate::sse::SseFrameDecoder;

/// Request body for starting an assessment stream. The server hands this to
/// the prompt builder opaquely.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssessRequest {
    pub claim: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Errors starting a stream, before the reader loop exists.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("stream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server rejected stream request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Last-known score values, updated field-by-field: a later event that omits
/// or nulls a field never clears a previously delivered value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientScores {
    pub reality: Option<f64>,
    pub integrity: Option<f64>,
}

/// Client-side mirror of the server session, rebuilt from events alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientState {
    pub accumulated_text: String,
    pub sections: HashMap<String, serde_json::Value>,
    pub scores: ClientScores,
    pub is_active: bool,
}

/// A poisoned lock only means a handler panicked mid-callback; the mirrored
/// state itself is still consistent, so recover it instead of propagating
/// the panic.
fn lock_state(state: &Mutex<ClientState>) -> std::sync::MutexGuard<'_, ClientState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Everything handed to `on_complete`: the server's completion payload plus
/// the state accumulated on this side and the measured wall-clock duration.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOutcome {
    pub payload: CompletePayload,
    pub elapsed_seconds: f64,
    pub accumulated_text: String,
    pub sections: HashMap<String, serde_json::Value>,
    pub scores: ClientScores,
}

/// Typed callbacks invoked by the reader loop, in exact server emission
/// order. Implementations should return quickly; offload slow work.
pub trait StreamHandler: Send + Sync + 'static {
    fn on_status(&self, _payload: &StatusPayload) {}
    fn on_chunk(&self, _payload: &ChunkPayload) {}
    fn on_section(&self, _payload: &SectionPayload) {}
    fn on_score(&self, _payload: &ScorePayload) {}
    fn on_error(&self, _payload: &ErrorPayload) {}
    fn on_complete(&self, _outcome: &ClientOutcome) {}
}

/// Consumes an assessment event stream over HTTP.
pub struct StreamClient {
    http: reqwest::Client,
    endpoint: String,
}

impl StreamClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Starts the stream: POSTs the request and spawns the reader loop over
    /// the response body. Returns a handle for cancellation and state
    /// inspection.
    pub async fn start(
        &self,
        request: AssessRequest,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<StreamHandle, ClientError> {
        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let state = Arc::new(Mutex::new(ClientState {
            is_active: true,
            ..ClientState::default()
        }));
        let (abort_tx, abort_rx) = watch::channel(false);
        let loop_state = state.clone();
        let task = tokio::spawn(async move {
            run_reader_loop(response.bytes_stream(), handler, loop_state, abort_rx).await;
        });

        Ok(StreamHandle {
            abort: abort_tx,
            state,
            task,
        })
    }
}

/// Handle to a running stream. Dropping the handle does not cancel the
/// stream; call `stop()` to cancel.
pub struct StreamHandle {
    abort: watch::Sender<bool>,
    state: Arc<Mutex<ClientState>>,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    /// Cancels the in-flight read. After `stop()` the reader loop unblocks
    /// promptly and no further callbacks fire. Idempotent.
    pub fn stop(&self) {
        let _ = self.abort.send(true);
    }

    /// Snapshot of the current mirrored state.
    pub fn state(&self) -> ClientState {
        lock_state(&self.state).clone()
    }

    /// Waits for the reader loop to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

enum Dispatch {
    Continue,
    Terminal,
}

async fn run_reader_loop<S, E>(
    byte_stream: S,
    handler: Arc<dyn StreamHandler>,
    state: Arc<Mutex<ClientState>>,
    mut abort_rx: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut decoder = SseFrameDecoder::new();
    let mut last_id: Option<u64> = None;
    let mut listen_for_abort = true;
    futures::pin_mut!(byte_stream);

    'reader: loop {
        tokio::select! {
            changed = abort_rx.changed(), if listen_for_abort => {
                match changed {
                    Ok(()) if *abort_rx.borrow() => {
                        debug!("stream cancelled by caller");
                        break 'reader;
                    }
                    Ok(()) => {}
                    Err(_) => {
                        // Handle dropped without cancelling; keep reading.
                        listen_for_abort = false;
                    }
                }
            }
            next = byte_stream.next() => {
                match next {
                    Some(Ok(bytes)) => {
                        for frame in decoder.push_chunk(&bytes) {
                            match dispatch_frame(frame, &handler, &state, &mut last_id, started) {
                                Dispatch::Continue => {}
                                Dispatch::Terminal => break 'reader,
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "stream read failed");
                        break 'reader;
                    }
                    None => {
                        if let Some(frame) = decoder.flush() {
                            let _ = dispatch_frame(frame, &handler, &state, &mut last_id, started);
                        }
                        break 'reader;
                    }
                }
            }
        }
    }

    lock_state(&state).is_active = false;
}

fn dispatch_frame(
    frame: crate::sse::SseFrame,
    handler: &Arc<dyn StreamHandler>,
    state: &Arc<Mutex<ClientState>>,
    last_id: &mut Option<u64>,
    started: Instant,
) -> Dispatch {
    if let Some(id) = frame.id {
        if let Some(prev) = *last_id
            && id != prev + 1
        {
            // Gap or repeat: anomalous but each event is independently
            // meaningful, so log and keep going.
            warn!(prev, id, "non-contiguous event id");
        }
        *last_id = Some(id);
    }

    let Some(kind) = frame.event.as_deref().and_then(EventKind::parse) else {
        warn!(event = frame.event.as_deref().unwrap_or(""), "unknown event kind, dropping record");
        return Dispatch::Continue;
    };

    let event = match StreamEvent::decode(kind, &frame.data) {
        Ok(event) => event,
        Err(err) => {
            warn!(%kind, error = %err, "undecodable event payload, dropping record");
            return Dispatch::Continue;
        }
    };

    match event {
        StreamEvent::Status(payload) => {
            handler.on_status(&payload);
            Dispatch::Continue
        }
        StreamEvent::Chunk(payload) => {
            lock_state(state)
                .accumulated_text
                .push_str(&payload.partial);
            handler.on_chunk(&payload);
            Dispatch::Continue
        }
        StreamEvent::Section(payload) => {
            lock_state(state)
                .sections
                .insert(payload.name.clone(), payload.content.clone());
            handler.on_section(&payload);
            Dispatch::Continue
        }
        StreamEvent::Score(payload) => {
            {
                let mut guard = lock_state(state);
                if let Some(value) = payload.reality_score {
                    guard.scores.reality = Some(value);
                }
                if let Some(value) = payload.integrity_score {
                    guard.scores.integrity = Some(value);
                }
            }
            handler.on_score(&payload);
            Dispatch::Continue
        }
        StreamEvent::Error(payload) => {
            lock_state(state).is_active = false;
            handler.on_error(&payload);
            Dispatch::Terminal
        }
        StreamEvent::Complete(payload) => {
            let outcome = {
                let mut guard = lock_state(state);
                guard.is_active = false;
                ClientOutcome {
                    payload,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    accumulated_text: guard.accumulated_text.clone(),
                    sections: guard.sections.clone(),
                    scores: guard.scores.clone(),
                }
            };
            handler.on_complete(&outcome);
            Dispatch::Terminal
        }
    }
}

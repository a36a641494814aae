use tokio::sync::mpsc;

use crate::event::{
    ChunkPayload, CompletePayload, ErrorPayload, ScorePayload, SectionPayload, StatusPayload,
    StreamEvent,
};

/// Failure writing to the event channel.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// The receiving side of the transport is gone. Fatal for the session:
    /// the orchestrator must stop producing and release the upstream stream.
    #[error("event stream transport closed")]
    TransportClosed,
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializes typed events into SSE wire frames on a bounded channel.
///
/// Every event gets a strictly increasing `id` starting at 1, unique within
/// the session. Keepalive frames are comment-only: they carry no id and are
/// invisible to event dispatch on the consuming side.
pub struct SseEmitter {
    tx: mpsc::Sender<String>,
    next_id: u64,
}

impl SseEmitter {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx, next_id: 1 }
    }

    /// Creates an emitter with its paired frame receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn status(
        &mut self,
        phase: impl Into<String>,
        message: impl Into<String>,
        progress: f64,
    ) -> Result<u64, EmitError> {
        self.write(StreamEvent::Status(StatusPayload {
            phase: phase.into(),
            message: message.into(),
            progress,
        }))
        .await
    }

    pub async fn chunk(
        &mut self,
        content_type: impl Into<String>,
        partial: impl Into<String>,
        complete: bool,
    ) -> Result<u64, EmitError> {
        self.write(StreamEvent::Chunk(ChunkPayload {
            content_type: content_type.into(),
            partial: partial.into(),
            complete,
        }))
        .await
    }

    pub async fn section(&mut self, payload: SectionPayload) -> Result<u64, EmitError> {
        self.write(StreamEvent::Section(payload)).await
    }

    pub async fn score(&mut self, payload: ScorePayload) -> Result<u64, EmitError> {
        self.write(StreamEvent::Score(payload)).await
    }

    pub async fn error(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after: Option<u64>,
    ) -> Result<u64, EmitError> {
        self.write(StreamEvent::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
            retry_after,
        }))
        .await
    }

    pub async fn complete(
        &mut self,
        success: bool,
        total_tokens: Option<u64>,
        duration: Option<f64>,
    ) -> Result<u64, EmitError> {
        self.write(StreamEvent::Complete(CompletePayload {
            success,
            total_tokens,
            duration,
        }))
        .await
    }

    /// Writes a comment-only frame to defeat idle-connection timeouts in
    /// intermediary proxies. Does not advance the event sequence.
    pub async fn keepalive(&mut self) -> Result<(), EmitError> {
        self.tx
            .send(": keepalive\n\n".to_string())
            .await
            .map_err(|_| EmitError::TransportClosed)
    }

    async fn write(&mut self, event: StreamEvent) -> Result<u64, EmitError> {
        let id = self.next_id;
        let data = event.payload_json()?;
        let frame = format!("id: {id}\nevent: {}\ndata: {data}\n\n", event.kind());
        self.tx
            .send(frame)
            .await
            .map_err(|_| EmitError::TransportClosed)?;
        self.next_id += 1;
        Ok(id)
    }
}

//! Progressive structured extraction and event delivery for streaming LLM
//! assessments.
//!
//! A model response arrives as raw text chunks that only form a valid JSON
//! document once complete. This crate surfaces structured fields (scores,
//! named sections) while the document is still arriving, re-emits them as
//! typed Server-Sent Events, and reassembles them on the consuming side:
//!
//! - producer: [`accumulator::ChunkAccumulator`] +
//!   [`extract::SpeculativeExtractor`] + [`emit::SseEmitter`], driven by
//!   [`orchestrate::StreamOrchestrator`];
//! - consumer: [`client::StreamClient`] with typed
//!   [`client::StreamHandler`] callbacks and prompt cancellation.
//!
//! Speculative extraction is heuristic by design; the one authoritative
//! whole-document parse happens at stream end and supersedes speculative
//! values for the returned report without retracting anything already on the
//! wire.

/// Append-only session text buffer.
pub mod accumulator;
/// Consuming side: HTTP stream client, reader loop, typed callbacks.
pub mod client;
/// SSE frame encoding with monotonic event ids.
pub mod emit;
/// Wire event kinds and payload shapes.
pub mod event;
/// Speculative field extraction and the terminal parse.
pub mod extract;
/// Session state machine driving accumulate → extract → emit.
pub mod orchestrate;
/// Incremental SSE record framing shared by both directions.
pub mod sse;

pub use accumulator::ChunkAccumulator;
pub use client::{
    AssessRequest, ClientError, ClientOutcome, ClientScores, ClientState, StreamClient,
    StreamHandle, StreamHandler,
};
pub use emit::{EmitError, SseEmitter};
pub use event::{
    ChunkPayload, CompletePayload, ErrorPayload, EventKind, ScorePayload, SectionPayload,
    StatusPayload, StreamEvent,
};
pub use extract::{Extraction, SpeculativeExtractor};
pub use orchestrate::{
    Phase, SessionOutcome, SessionReport, SourceError, SourceEvent, SourceUsage,
    StreamOrchestrator,
};
pub use sse::{SseFrame, SseFrameDecoder};

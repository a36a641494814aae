//! One-line import for the types most harness callers touch.
pub use crate::{
    AbortHandle, Harness, HarnessBuilder, HarnessError, InputPart, ModelRef, ProviderId,
    RunBuilder, RunOutput, RunStream, Session, StreamEvent, TokenUsage,
};

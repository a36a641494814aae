use crate::{RunOutput, errors::RunFailure, model::ProviderId};

/// Events delivered to the consumer of a `RunStream`.
///
/// Every run emits `RunStarted` first, then zero or more `OutputDelta`s with
/// contiguous `seq` values from 0, then exactly one terminal event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    RunStarted {
        run_id: uuid::Uuid,
        session_id: uuid::Uuid,
        provider: ProviderId,
        model: String,
    },
    /// Incremental text output chunk.
    OutputDelta {
        run_id: uuid::Uuid,
        seq: u64,
        text: String,
    },
    /// Terminal success event with the full transcript and usage.
    Completed {
        run_id: uuid::Uuid,
        output: RunOutput,
    },
    /// Terminal failure event.
    Error {
        run_id: uuid::Uuid,
        error: RunFailure,
    },
}

impl StreamEvent {
    /// True for the events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    pub fn run_id(&self) -> uuid::Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::OutputDelta { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Error { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_and_error_are_terminal() {
        let run_id = uuid::Uuid::new_v4();
        assert!(!StreamEvent::OutputDelta {
            run_id,
            seq: 0,
            text: "x".into(),
        }
        .is_terminal());
        assert!(StreamEvent::Completed {
            run_id,
            output: RunOutput::default(),
        }
        .is_terminal());
        assert!(StreamEvent::Error {
            run_id,
            error: RunFailure::Cancelled,
        }
        .is_terminal());
    }
}

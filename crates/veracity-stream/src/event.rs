use serde::{Deserialize, Serialize};

/// Wire event kinds. The kind travels on the SSE `event:` line; the payload
/// travels as a single-line JSON object on the `data:` line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    Status,
    Chunk,
    Section,
    Score,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Chunk => "chunk",
            Self::Section => "section",
            Self::Score => "score",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "status" => Some(Self::Status),
            "chunk" => Some(Self::Chunk),
            "section" => Some(Self::Section),
            "score" => Some(Self::Score),
            "error" => Some(Self::Error),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle progress notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub phase: String,
    pub message: String,
    /// Coarse progress estimate in `0..=1`.
    pub progress: f64,
}

/// Incremental raw-text output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Content type of the chunk; currently always `text`.
    #[serde(rename = "type")]
    pub content_type: String,
    pub partial: String,
    pub complete: bool,
}

/// A named section of the structured response, possibly still provisional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionPayload {
    pub name: String,
    pub content: serde_json::Value,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// One or both numeric scores. `reality_score` is always present on the wire
/// (null when unknown); `integrity_score` is omitted when unknown so a later
/// event can never clear a previously delivered value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    pub reality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_score: Option<f64>,
    pub provisional: bool,
}

/// Terminal failure notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Terminal success notification. `success: false` means the terminal parse
/// failed; already-delivered speculative events remain the best available
/// state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Server-side wall-clock duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// A typed event as it appears on the wire (without its sequence id).
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Status(StatusPayload),
    Chunk(ChunkPayload),
    Section(SectionPayload),
    Score(ScorePayload),
    Error(ErrorPayload),
    Complete(CompletePayload),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status(_) => EventKind::Status,
            Self::Chunk(_) => EventKind::Chunk,
            Self::Section(_) => EventKind::Section,
            Self::Score(_) => EventKind::Score,
            Self::Error(_) => EventKind::Error,
            Self::Complete(_) => EventKind::Complete,
        }
    }

    /// Serializes the payload to the single-line JSON carried on `data:`.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Status(p) => serde_json::to_string(p),
            Self::Chunk(p) => serde_json::to_string(p),
            Self::Section(p) => serde_json::to_string(p),
            Self::Score(p) => serde_json::to_string(p),
            Self::Error(p) => serde_json::to_string(p),
            Self::Complete(p) => serde_json::to_string(p),
        }
    }

    /// Decodes an event from its wire kind and data payload.
    pub fn decode(kind: EventKind, data: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            EventKind::Status => Self::Status(serde_json::from_str(data)?),
            EventKind::Chunk => Self::Chunk(serde_json::from_str(data)?),
            EventKind::Section => Self::Section(serde_json::from_str(data)?),
            EventKind::Score => Self::Score(serde_json::from_str(data)?),
            EventKind::Error => Self::Error(serde_json::from_str(data)?),
            EventKind::Complete => Self::Complete(serde_json::from_str(data)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_payload_omits_unknown_integrity_score() {
        let payload = ScorePayload {
            reality_score: Some(7.0),
            integrity_score: None,
            provisional: true,
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains("\"realityScore\":7.0"));
        assert!(!json.contains("integrityScore"));
        assert!(json.contains("\"provisional\":true"));
    }

    #[test]
    fn section_payload_uses_final_on_the_wire() {
        let payload = SectionPayload {
            name: "summary".into(),
            content: serde_json::json!("short"),
            is_final: false,
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains("\"final\":false"));
    }

    #[test]
    fn decode_round_trips_each_kind() {
        let event = StreamEvent::Complete(CompletePayload {
            success: true,
            total_tokens: Some(412),
            duration: Some(3.5),
        });
        let data = event.payload_json().expect("encode");
        let decoded = StreamEvent::decode(EventKind::Complete, &data).expect("decode");
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_kind_is_not_an_event() {
        assert_eq!(EventKind::parse("keepalive"), None);
    }
}

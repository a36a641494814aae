use crate::ProviderId;
use crate::content::TokenUsage;
use crate::errors::ProviderError;
use crate::provider::{CompletionMeta, ProviderEvent};

use veracity_stream::sse::SseFrame;

/// Per-stream accumulator for the Messages API event sequence.
///
/// Anthropic splits completion metadata across events: `message_start` carries
/// input token usage, `message_delta` carries the stop reason and output token
/// usage, and `message_stop` marks the end. The state folds those into one
/// `ProviderEvent::Completed`.
#[derive(Debug, Default)]
pub(crate) struct AnthropicStreamState {
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
}

impl AnthropicStreamState {
    pub(crate) fn apply_frame(
        &mut self,
        provider: &ProviderId,
        frame: &SseFrame,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        if frame.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = serde_json::from_str(&frame.data).map_err(|e| {
            ProviderError::transport(provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        self.apply_json(provider, &value)
    }

    pub(crate) fn apply_json(
        &mut self,
        provider: &ProviderId,
        value: &serde_json::Value,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
            return Ok(Vec::new());
        };
        match event_type {
            "message_start" => {
                if let Some(tokens) = value
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(|v| v.as_u64())
                {
                    self.input_tokens = tokens;
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta = value.get("delta");
                let is_text = delta
                    .and_then(|d| d.get("type"))
                    .and_then(|v| v.as_str())
                    .is_some_and(|t| t == "text_delta");
                if let Some(text) = delta.and_then(|d| d.get("text")).and_then(|v| v.as_str())
                    && is_text
                {
                    Ok(vec![ProviderEvent::TextDelta {
                        text: text.to_string(),
                    }])
                } else {
                    Ok(Vec::new())
                }
            }
            "message_delta" => {
                if let Some(reason) = value
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|v| v.as_str())
                {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(tokens) = value
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(|v| v.as_u64())
                {
                    self.output_tokens = tokens;
                }
                Ok(Vec::new())
            }
            "message_stop" => Ok(vec![ProviderEvent::Completed(CompletionMeta {
                finish_reason: self.stop_reason.take(),
                usage: Some(TokenUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: self.output_tokens,
                }),
            })]),
            "error" => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Anthropic stream error");
                Err(ProviderError::provider(provider.clone(), message, None))
            }
            // ping, content_block_start, content_block_stop carry nothing we
            // surface.
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderId {
        ProviderId::new("anthropic")
    }

    #[test]
    fn maps_text_delta_events() {
        let mut state = AnthropicStreamState::default();
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "The claim" }
        });
        let events = state.apply_json(&provider(), &delta).expect("map");
        assert_eq!(
            events,
            vec![ProviderEvent::TextDelta {
                text: "The claim".into()
            }]
        );
    }

    #[test]
    fn non_text_deltas_are_ignored() {
        let mut state = AnthropicStreamState::default();
        let delta = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "input_json_delta", "partial_json": "{\"a\":" }
        });
        let events = state.apply_json(&provider(), &delta).expect("map");
        assert!(events.is_empty());
    }

    #[test]
    fn message_stop_folds_usage_and_stop_reason() {
        let mut state = AnthropicStreamState::default();
        let start = serde_json::json!({
            "type": "message_start",
            "message": { "id": "msg_1", "usage": { "input_tokens": 37, "output_tokens": 1 } }
        });
        let delta = serde_json::json!({
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn" },
            "usage": { "output_tokens": 412 }
        });
        let stop = serde_json::json!({ "type": "message_stop" });

        assert!(state.apply_json(&provider(), &start).expect("start").is_empty());
        assert!(state.apply_json(&provider(), &delta).expect("delta").is_empty());
        let events = state.apply_json(&provider(), &stop).expect("stop");
        assert_eq!(
            events,
            vec![ProviderEvent::Completed(CompletionMeta {
                finish_reason: Some("end_turn".into()),
                usage: Some(TokenUsage {
                    input_tokens: 37,
                    output_tokens: 412,
                }),
            })]
        );
    }

    #[test]
    fn ping_events_are_invisible() {
        let mut state = AnthropicStreamState::default();
        let ping = serde_json::json!({ "type": "ping" });
        assert!(state.apply_json(&provider(), &ping).expect("ping").is_empty());
    }

    #[test]
    fn error_event_becomes_provider_error() {
        let mut state = AnthropicStreamState::default();
        let error = serde_json::json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": "Overloaded" }
        });
        let err = state.apply_json(&provider(), &error).expect_err("error");
        assert!(matches!(err, ProviderError::Provider { .. }));
        assert_eq!(err.message(), "Overloaded");
    }

    #[test]
    fn malformed_json_frame_is_a_transport_error() {
        let mut state = AnthropicStreamState::default();
        let frame = SseFrame {
            id: None,
            event: Some("content_block_delta".into()),
            data: "{not json".into(),
        };
        let err = state.apply_frame(&provider(), &frame).expect_err("parse");
        assert!(matches!(err, ProviderError::Transport { .. }));
    }
}

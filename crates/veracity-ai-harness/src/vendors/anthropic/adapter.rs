use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::ProviderId;
use crate::content::InputPart;
use crate::errors::{HarnessError, ProviderError};
use crate::provider::{
    ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle,
};

use veracity_stream::sse::SseFrameDecoder;

use super::config::{ANTHROPIC_VERSION, AnthropicClientConfig};
use super::options::AnthropicRequestOptions;
use super::transport::AnthropicStreamState;

const ANTHROPIC_PROVIDER: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 4096;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Provider adapter for Anthropic's Messages API (streaming).
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicClientConfig,
}

impl AnthropicProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: AnthropicClientConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "Anthropic client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build Anthropic client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(AnthropicClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(ANTHROPIC_PROVIDER)
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = ProviderId::new(ANTHROPIC_PROVIDER);
        let request_options = read_anthropic_options(&req, &provider_id)?;
        let body = build_request_body(&req, &request_options)?;
        debug!(run_id = %req.run_id, session_id = %req.session_id, model = %req.model.model, "starting Anthropic messages stream");

        let mut http_req = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(timeout) = req.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::transport(provider_id.clone(), format!("Anthropic request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("Anthropic messages request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        let stream = anthropic_event_stream(provider_id.clone(), bytes_stream);

        Ok(ProviderStreamHandle {
            stream: Box::pin(stream),
            metadata: ProviderResponseMeta::default(),
        })
    }
}

fn read_anthropic_options(
    req: &ProviderRequest,
    provider_id: &ProviderId,
) -> Result<AnthropicRequestOptions, ProviderError> {
    match req.vendor_options.get(provider_id) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid Anthropic options: {e}"))
        }),
        None => Ok(AnthropicRequestOptions::default()),
    }
}

pub(crate) fn build_request_body(
    req: &ProviderRequest,
    options: &AnthropicRequestOptions,
) -> Result<serde_json::Value, ProviderError> {
    let provider_id = ProviderId::new(ANTHROPIC_PROVIDER);
    let user_payload = render_user_input(&req.input_parts).map_err(|e| {
        ProviderError::protocol(
            provider_id.clone(),
            format!("failed to serialize input parts: {e}"),
        )
    })?;

    let mut body = serde_json::json!({
        "model": req.model.model,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": [{
            "role": "user",
            "content": user_payload,
        }],
        "stream": true,
    });

    if let Some(system_prompt) = req
        .system_prompt
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        body["system"] = serde_json::json!(system_prompt);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }

    Ok(body)
}

fn render_user_input(parts: &[InputPart]) -> Result<String, serde_json::Error> {
    let mut segments = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            InputPart::Text(text) => segments.push(text.clone()),
            InputPart::Json(value) => segments.push(serde_json::to_string(value)?),
        }
    }
    Ok(segments.join("\n"))
}

fn anthropic_event_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseFrameDecoder,
        message: AnthropicStreamState,
        pending: VecDeque<ProviderEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseFrameDecoder::default(),
            message: AnthropicStreamState::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.push_chunk(&chunk);
                        for frame in frames {
                            let events = state.message.apply_frame(&state.provider_id, &frame)?;
                            for event in events {
                                state.pending.push_back(event);
                            }
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("Anthropic streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        if let Some(frame) = state.decoder.flush() {
                            let events = state.message.apply_frame(&state.provider_id, &frame)?;
                            for event in events {
                                state.pending.push_back(event);
                            }
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InputPart;
    use crate::model::ModelRef;
    use crate::provider::ProviderRequest;
    use std::collections::HashMap;

    fn request_with_parts(parts: Vec<InputPart>) -> ProviderRequest {
        ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            model: ModelRef::new("anthropic", "claude-sonnet-4-20250514"),
            system_prompt: Some("sys".into()),
            input_parts: parts,
            timeout: None,
            vendor_options: HashMap::new(),
        }
    }

    #[test]
    fn request_serialization_has_stream_and_max_tokens_defaults() {
        let req = request_with_parts(vec![InputPart::Text("hello".into())]);
        let body = build_request_body(&req, &AnthropicRequestOptions::default()).expect("body");
        assert_eq!(body.get("stream").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(
            body.get("max_tokens").and_then(|v| v.as_u64()),
            Some(u64::from(DEFAULT_MAX_TOKENS))
        );
        assert_eq!(
            body.get("model").and_then(|v| v.as_str()),
            Some("claude-sonnet-4-20250514")
        );
        assert_eq!(body.get("system").and_then(|v| v.as_str()), Some("sys"));
    }

    #[test]
    fn vendor_options_are_applied_when_present() {
        let req = request_with_parts(vec![InputPart::Json(serde_json::json!({"a":1}))]);
        let body = build_request_body(
            &req,
            &AnthropicRequestOptions::default()
                .max_tokens(8192)
                .temperature(0.2),
        )
        .expect("body");
        assert_eq!(body.get("max_tokens").and_then(|v| v.as_u64()), Some(8192));
        assert_eq!(
            body.get("temperature").and_then(|v| v.as_f64()),
            Some(0.2)
        );
    }

    #[tokio::test]
    async fn env_gated_smoke_collect_text_if_key_present() {
        if std::env::var("ANTHROPIC_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping Anthropic smoke test (ANTHROPIC_API_KEY missing)");
            return;
        }

        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(
                AnthropicProvider::from_env().expect("provider"),
            ))
            .build()
            .expect("harness");

        let result = harness
            .session("smoke")
            .run(crate::ModelRef::new("anthropic", "claude-3-5-haiku-20241022"))
            .system_prompt("Return exactly the word: ok")
            .user_text("ok")
            .collect_text()
            .await;

        assert!(result.is_ok(), "Anthropic smoke failed: {result:?}");
    }

    #[tokio::test]
    async fn env_gated_smoke_stream_emits_started_and_terminal_if_key_present() {
        if std::env::var("ANTHROPIC_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping Anthropic stream smoke test (ANTHROPIC_API_KEY missing)");
            return;
        }

        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(
                AnthropicProvider::from_env().expect("provider"),
            ))
            .build()
            .expect("harness");

        let mut run = harness
            .session("smoke-stream")
            .run(crate::ModelRef::new("anthropic", "claude-3-5-haiku-20241022"))
            .timeout(std::time::Duration::from_secs(30))
            .system_prompt("Reply with a short greeting.")
            .user_text("hello")
            .start_stream()
            .await
            .expect("start stream");

        let mut saw_started = false;
        let mut saw_terminal = false;
        while let Some(event) = run.next_event().await {
            match event {
                crate::StreamEvent::RunStarted { .. } => saw_started = true,
                crate::StreamEvent::Completed { .. } | crate::StreamEvent::Error { .. } => {
                    saw_terminal = true;
                    break;
                }
                crate::StreamEvent::OutputDelta { .. } => {}
            }
        }

        let _ = run.finish().await;
        assert!(saw_started, "expected RunStarted event");
        assert!(saw_terminal, "expected terminal event");
    }
}

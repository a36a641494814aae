use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::content::{InputPart, TokenUsage};
use crate::errors::ProviderError;
use crate::model::{ModelRef, ProviderId};

/// Events a vendor adapter produces from its native stream.
///
/// The contract is delta-only: adapters emit text increments followed by one
/// `Completed` carrying end-of-stream metadata. Transcript aggregation is the
/// run layer's job, never the adapter's.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Incremental text output.
    TextDelta { text: String },
    /// End of the provider stream.
    Completed(CompletionMeta),
}

/// Metadata a provider reports when its stream ends normally.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionMeta {
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Fully validated request handed to a provider adapter.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub run_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub input_parts: Vec<InputPart>,
    /// Optional per-request timeout applied by the adapter's HTTP client.
    pub timeout: Option<Duration>,
    /// Provider-scoped option blobs, keyed by provider id; adapters read only
    /// their own entry.
    pub vendor_options: HashMap<ProviderId, serde_json::Value>,
}

/// Boxed stream of normalized provider events.
pub type ProviderEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static>>;

/// Response-level metadata known at stream start.
#[derive(Clone, Debug, Default)]
pub struct ProviderResponseMeta {
    pub model: Option<String>,
    pub request_id: Option<String>,
}

/// A started provider stream plus its metadata.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub metadata: ProviderResponseMeta,
}

/// Contract implemented by each vendor integration.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable id this adapter is registered under.
    fn id(&self) -> ProviderId;

    /// Issues the request and returns the normalized event stream.
    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError>;
}

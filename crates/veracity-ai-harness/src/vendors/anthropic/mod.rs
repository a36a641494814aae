//! Anthropic provider integration and request options.
//!
//! Vendor-specific configuration lives here so the root harness API can remain
//! provider-agnostic.
mod adapter;
mod config;
mod options;
pub(crate) mod transport;

pub use adapter::AnthropicProvider;
pub use config::AnthropicClientConfig;
pub use options::AnthropicRequestOptions;

use crate::ProviderId;
use crate::run::RunBuilder;

/// Extension trait for attaching Anthropic-specific options to a `RunBuilder`.
pub trait AnthropicRunBuilderExt {
    /// Adds Anthropic request options for the current run.
    ///
    /// These options are stored internally under the `anthropic` provider key
    /// and read only by `AnthropicProvider`.
    fn anthropic_options(self, options: AnthropicRequestOptions) -> Self;
}

impl AnthropicRunBuilderExt for RunBuilder {
    fn anthropic_options(self, options: AnthropicRequestOptions) -> Self {
        let value = serde_json::to_value(options)
            .expect("AnthropicRequestOptions serialization should be infallible");
        self.set_vendor_options_json(ProviderId::new("anthropic"), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderAdapter, ProviderRequest, ProviderStreamHandle};
    use crate::{Harness, ProviderError, ProviderId};
    use std::sync::Arc;

    struct Dummy;

    #[async_trait::async_trait]
    impl ProviderAdapter for Dummy {
        fn id(&self) -> ProviderId {
            ProviderId::new("anthropic")
        }

        async fn start_stream(
            &self,
            _req: ProviderRequest,
        ) -> Result<ProviderStreamHandle, ProviderError> {
            unreachable!()
        }
    }

    #[test]
    fn anthropic_run_builder_ext_stores_options_under_anthropic_key() {
        let harness = Harness::builder()
            .register_provider(Arc::new(Dummy))
            .build()
            .expect("harness");
        let builder = harness
            .session("t")
            .run(crate::ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
            .user_text("hello")
            .anthropic_options(AnthropicRequestOptions::default().max_tokens(2048));

        let value = builder
            .vendor_options_value(&ProviderId::new("anthropic"))
            .expect("stored option");
        assert_eq!(value.get("max_tokens").and_then(|v| v.as_u64()), Some(2048));
    }
}

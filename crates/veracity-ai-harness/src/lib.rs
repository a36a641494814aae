//! Standalone AI harness crate with a builder-first async API.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Builder-first usage (Anthropic)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use veracity_ai_harness::prelude::*;
//! use veracity_ai_harness::vendors::anthropic::{
//!     AnthropicProvider, AnthropicRequestOptions, AnthropicRunBuilderExt,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let harness = Harness::builder()
//!     .register_provider(Arc::new(AnthropicProvider::from_env()?))
//!     .build()?;
//!
//! let text = harness
//!     .session("demo")
//!     .run(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
//!     .system_prompt("Answer briefly.")
//!     .user_text("Say hello")
//!     .anthropic_options(AnthropicRequestOptions::default().max_tokens(512))
//!     .collect_text()
//!     .await?;
//!
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

/// Input content types, token usage, and the final run output.
pub mod content;
/// Public error types used by the harness API.
pub mod errors;
/// Harness entry point, provider registry, and sessions.
pub mod harness;
/// Model and provider identifiers.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// Run builder, streaming handle, and cancellation handle.
pub mod run;
/// Events delivered to run consumers.
pub mod stream;
/// Vendor-specific integrations and extension traits.
pub mod vendors;

pub use content::{InputPart, RunOutput, TokenUsage};
pub use errors::{HarnessError, ProviderError, RunFailure};
pub use harness::{Harness, HarnessBuilder, Session};
pub use model::{ModelRef, ProviderId};
pub use provider::{
    CompletionMeta, ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponseMeta,
    ProviderStreamHandle,
};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use stream::StreamEvent;

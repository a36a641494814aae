use std::sync::Arc;
use std::time::Duration;

use veracity_ai_harness::vendors::anthropic::AnthropicProvider;
use veracity_ai_harness::{Harness, ModelRef};

use crate::config;
use crate::limiter::RateLimiter;
use crate::prompt::{PromptBuilder, RubricPromptBuilder};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Shared application state for HTTP handlers.
///
/// Everything in here is constructed once at startup and injected; handlers
/// never reach for globals.
#[derive(Clone)]
pub struct AppState {
    pub harness: Harness,
    pub model: ModelRef,
    pub prompts: Arc<dyn PromptBuilder>,
    pub limiter: Arc<RateLimiter>,
    pub max_tokens: u32,
}

impl AppState {
    /// Builds state from the environment: Anthropic credentials, model
    /// selection, and rate-limit tuning.
    pub fn from_env() -> anyhow::Result<Self> {
        let harness = Harness::builder()
            .register_provider(Arc::new(AnthropicProvider::from_env()?))
            .build()?;
        let model_name = config::get_env_or::<String>("VERACITY_MODEL", DEFAULT_MODEL.into());
        let max_tokens = config::get_env_or::<u32>("VERACITY_MAX_TOKENS", 4096);
        let limit = config::get_env_or::<u32>("RATE_LIMIT_REQUESTS", 10);
        let window_secs = config::get_env_or::<u64>("RATE_LIMIT_WINDOW_SECS", 60);
        Ok(Self {
            harness,
            model: ModelRef::new("anthropic", model_name),
            prompts: Arc::new(RubricPromptBuilder),
            limiter: Arc::new(RateLimiter::new(
                limit,
                Duration::from_secs(window_secs),
                10_000,
            )),
            max_tokens,
        })
    }
}

use std::sync::Arc;

use veracity_ai_harness::prelude::*;
use veracity_ai_harness::vendors::anthropic::{
    AnthropicProvider, AnthropicRequestOptions, AnthropicRunBuilderExt,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let harness = Harness::builder()
        .register_provider(Arc::new(AnthropicProvider::from_env()?))
        .build()?;

    let text = harness
        .session("collect")
        .run(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
        .system_prompt("You are a concise assistant. Reply with a short sentence.")
        .user_json(serde_json::json!({"task":"say hello"}))
        .anthropic_options(AnthropicRequestOptions::default().max_tokens(256))
        .collect_text()
        .await?;

    println!("{text}");
    Ok(())
}

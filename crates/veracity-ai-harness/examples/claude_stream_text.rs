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

    let mut run = harness
        .session("stream")
        .run(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
        .system_prompt("Reply to test AI harness streaming.")
        .user_text("Stream a greeting.")
        .anthropic_options(AnthropicRequestOptions::default().max_tokens(256))
        .start_stream()
        .await?;

    while let Some(event) = run.next_event().await {
        match event {
            StreamEvent::OutputDelta { text, .. } => print!("{text}"),
            StreamEvent::Completed { .. } => println!(),
            StreamEvent::Error { error, .. } => eprintln!("run error: {error}"),
            StreamEvent::RunStarted { .. } => {}
        }
    }

    let _ = run.finish().await?;
    Ok(())
}

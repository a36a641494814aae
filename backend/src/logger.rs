use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use super::config;

pub fn init() -> anyhow::Result<()> {
    let crate_name = config::get_env_or::<String>("CRATE_NAME", "backend".into());
    let crate_log = config::get_env_or::<String>("CRATE_LOG", "info".into());
    let directive = format!("{}={}", crate_name, crate_log);
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive(directive.parse()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

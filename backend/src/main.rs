use backend::{config, http, logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init();
    logger::init()?;

    let state = http::AppState::from_env()?;
    let addr = config::get_env_or::<String>("BIND_ADDR", "127.0.0.1:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, http::create_router(state)).await?;
    Ok(())
}

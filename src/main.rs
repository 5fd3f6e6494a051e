use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use movie_rec_api::{
    api::{create_router, AppState},
    config::Config,
    context::AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("movie_rec_api=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    // Dataset load and training finish before the listener binds
    let ctx = tokio::task::spawn_blocking(move || AppContext::load(config))
        .await
        .context("Startup task panicked")?
        .context("Failed to build application context")?;

    let app = create_router(AppState::new(ctx));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

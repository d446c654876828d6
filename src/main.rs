use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use anchor_face::inference::InferenceContext;
use anchor_face::server::{router, AppState};

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MODELS_DIR: &str = "models";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,axum=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let addr: SocketAddr = std::env::var("ANCHOR_FACE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("ANCHOR_FACE_ADDR is not a socket address")?;
    let models_dir = std::env::var("ANCHOR_FACE_MODELS").unwrap_or_else(|_| DEFAULT_MODELS_DIR.to_string());

    let inference = InferenceContext::new(&models_dir);
    let app = router(AppState::new(inference, models_dir));

    info!("listening" = %addr, "event" = "server.start");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    if let Err(err) = axum::serve(listener, app).await {
        error!(%err, "server error");
        return Err(err.into());
    }
    Ok(())
}

//! solar-assistant HTTP 服务
//!
//! 启动: cargo run --bin solar-assistant-web --features web
//! 首次使用先访问 /login 完成 iSolarCloud 授权

use std::sync::Arc;

use anyhow::Context;
use solar_assistant::config::load_config;
use solar_assistant::web::{router, AppState};
use solar_assistant::{observability, Agent};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load configuration")?;
    let bind = cfg.web.bind.clone();
    let agent = Agent::from_config(cfg, None)
        .await
        .context("Failed to create agent")?;

    let app = router(AppState::new(Arc::new(agent)));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Solar assistant listening on http://{}", bind);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

//! # stopguard — Position Monitor Service
//!
//! ```text
//!  ┌─────────────┐  POST /api/feed/tick   ┌──────────────┐  fan-out  ┌──────────────────────┐
//!  │  Collector  │ ─────────────────────▶ │ ChannelFeed  │ ────────▶ │ Portfolio            │
//!  └─────────────┘                        └──────────────┘           │ ├─ monitor EURUSD 👁️ │──▶ close → bridge
//!                                                                    │ ├─ monitor GBPUSD 👁️ │
//!  ┌─────────────┐  POST/PUT/DELETE /api/positions                   │ └─ margin supervisor │
//!  │  Operator   │ ─────────────────────────────────────────────────▶└──────────────────────┘
//!  └─────────────┘                                                              │ events
//!  ┌─────────────┐  ws://host/ws/monitor  ◀──────────────────────────────────────┘
//!  │  Dashboard  │  GET /api/positions · /api/portfolio/margin · /api/health
//!  └─────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stopguard::{
    config::ServiceConfig,
    engine::{executor::HttpGateway, feed::run_fan_out},
    models::TriggerFlags,
    routes::{
        feed::ingest_tick,
        monitor::{get_margin, health_check, ws_monitor},
        positions::{
            delete_position, disable_stop_loss, disable_take_profit, list_positions,
            open_position, set_stop_loss, set_take_profit,
        },
    },
    state::build_state,
};

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional — CI/prod can use real env vars) ──────────────
    dotenvy::dotenv().ok();

    // ── 2. Initialise structured logging ─────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env()
            .add_directive("stopguard=debug".parse()?)
            .add_directive("tower_http=info".parse()?))
        .init();

    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        STOPGUARD — Position Monitor           ║
  ║        Rust + Axum  ·  SL / TP / Margin       ║
  ╚═══════════════════════════════════════════════╝"#
    );

    // ── 3. Config + gateway ──────────────────────────────────────────────────
    let config = ServiceConfig::from_env();
    info!(
        username = %config.username,
        gateway  = %config.gateway_base_url,
        monitor  = ?config.monitor,
        "⚙️ Configuration loaded"
    );

    let gateway = Arc::new(HttpGateway::new(
        reqwest::Client::new(),
        config.gateway_base_url.clone(),
        config.monitor.close_timeout,
    ));

    // ── 4. Build shared state ────────────────────────────────────────────────
    let state = build_state(&config, gateway);

    // ── 5. Re-attach monitors to positions still open at the venue ───────────
    if let Err(e) = state.opener.sync_open_positions(TriggerFlags::default()).await {
        warn!(error = %e, "Startup sync failed — starting with an empty portfolio");
    }

    // ── 6. Background tasks ──────────────────────────────────────────────────
    let shutdown = state.portfolio.shutdown_token();
    let supervisor = state.portfolio.start_margin_supervisor();
    let fan_out = tokio::spawn(run_fan_out(
        state.feed.clone(),
        state.portfolio.clone(),
        config.feed_symbols.clone(),
        shutdown.clone(),
    ));

    // ── 7. Build CORS layer ──────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ── 8. Build the Axum router ─────────────────────────────────────────────
    let app = Router::new()
        // ── Price ingest ─────────────────────────────────────────────────────
        .route("/api/feed/tick",                      post(ingest_tick))
        // ── Positions ────────────────────────────────────────────────────────
        .route("/api/positions",                      post(open_position).get(list_positions))
        .route("/api/positions/:symbol",              delete(delete_position))
        .route("/api/positions/:symbol/stop-loss",    put(set_stop_loss).delete(disable_stop_loss))
        .route("/api/positions/:symbol/take-profit",  put(set_take_profit).delete(disable_take_profit))
        // ── Monitor ──────────────────────────────────────────────────────────
        .route("/api/portfolio/margin",               get(get_margin))
        .route("/api/health",                         get(health_check))
        .route("/ws/monitor",                         get(ws_monitor))
        // ── Middleware ───────────────────────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    // ── 9. Bind & Serve ──────────────────────────────────────────────────────
    let addr: SocketAddr = config.bind_addr.parse()?;
    info!(?addr, "🚀 stopguard server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("🛑 Ctrl-C received"),
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await?;

    // ── 10. Stop monitors and background tasks ───────────────────────────────
    state.portfolio.shutdown().await;

    match fan_out.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Price feed fan-out ended with error"),
        Err(e) => error!(error = %e, "Price feed fan-out task failed"),
    }
    if let Err(e) = supervisor.await {
        error!(error = %e, "Margin supervisor task failed");
    }

    info!("👋 stopguard stopped");
    Ok(())
}

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_access::config::AccessConfig;
use courier_access::registry::Registry;
use courier_access::rpc::AccessService;
use courier_access::session::{self, AccessState};
use courier_rpc::{ClientPool, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    let config = Arc::new(AccessConfig::from_env()?);

    let registry = Arc::new(Registry::new());
    let pool = ClientPool::new(PoolConfig {
        call_timeout: config.rpc_timeout,
        idle_timeout: config.pool_idle,
    });
    pool.spawn_idle_sweeper();

    // AccessRPC listener for the logic tier.
    let rpc_listener = tokio::net::TcpListener::bind(&config.rpc_listen_addr).await?;
    let service = Arc::new(AccessService::new(registry.clone(), config.enqueue_timeout));
    tokio::spawn(courier_rpc::serve(rpc_listener, service));
    info!(
        "Access node RPC listening on {} (advertised as {})",
        config.rpc_listen_addr, config.advertise_addr
    );

    let state = AccessState {
        config: config.clone(),
        registry,
        pool,
    };

    let app = Router::new()
        .route("/join", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Access node listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<AccessState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ws = ws
        .max_message_size(state.config.ws_max_message)
        .write_buffer_size(state.config.ws_write_buffer);
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

use std::sync::Arc;

use tracing::info;

use courier_logic::config::LogicConfig;
use courier_logic::dispatch::{DispatchConfig, DispatchQueue};
use courier_logic::presence::PresenceDirectory;
use courier_logic::rpc::LogicService;
use courier_logic::transport::RpcAccessTransport;
use courier_rpc::{ClientPool, PoolConfig};
use courier_storage::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .init();

    let config = LogicConfig::from_env()?;

    let store = Arc::new(Database::open(&config.db_path)?);
    let presence = Arc::new(PresenceDirectory::new());

    let pool = ClientPool::new(PoolConfig {
        call_timeout: config.rpc_timeout,
        idle_timeout: config.pool_idle,
    });
    pool.spawn_idle_sweeper();
    let transport = Arc::new(RpcAccessTransport::new(pool));

    let queue = DispatchQueue::new(
        store,
        transport,
        presence.clone(),
        DispatchConfig {
            queue_buffer: config.queue_buffer,
            max_attempts: config.max_attempts,
            retry_base: config.retry_base,
        },
    );
    let (dispatch, consumer) = queue.start();

    let service = Arc::new(LogicService::new(presence, dispatch.clone()));
    let listener = tokio::net::TcpListener::bind(&config.rpc_addr).await?;
    info!("Logic node listening on {}", config.rpc_addr);

    tokio::select! {
        _ = courier_rpc::serve(listener, service) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c");
        }
    }

    dispatch.shutdown();
    consumer.await?;

    Ok(())
}

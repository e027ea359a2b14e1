use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use keyturn::api::{CommandRegistry, Dispatcher, account};
use keyturn::config::Config;
use keyturn::db::ConnectionPool;
use keyturn::router::{KeyturnState, keyturn_router};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.basic.listen_addr,
        database_url = %cfg.database.url,
        pool_size = cfg.database.pool_size,
        acquire_poll_ms = cfg.database.acquire_poll_ms,
        loglevel = %cfg.basic.loglevel
    );

    let pool = ConnectionPool::connect(&cfg.database)
        .await
        .inspect_err(|e| error!(error = %e, "failed to create database connection pool"))?;

    let mut registry = CommandRegistry::new();
    {
        let mut db = pool.acquire().await;
        account::init(&mut db, &mut registry)
            .await
            .inspect_err(|e| error!(error = %e, "account module initialization failed"))?;
    }
    info!(commands = registry.len(), "command registry ready");

    let dispatcher = Dispatcher::new(Arc::new(pool), Arc::new(registry));
    let app = keyturn_router(KeyturnState::new(dispatcher));

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

/// First Ctrl-C stops accepting and lets in-flight batches finish; no deadline
/// is enforced on them. A second Ctrl-C exits at once.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C; graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested; draining in-flight requests");
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt; exiting immediately");
            std::process::exit(130);
        }
    });
}

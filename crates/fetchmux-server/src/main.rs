use clap::Parser;
use fetchmux_server::server::{
    admission::AdmissionLayer,
    config::{CliArgs, ServerConfig},
    fetch::HttpFetcher,
    pool::Dispatcher,
    router::build_router,
    serve::{ServeOptions, serve},
    service::handler::MultiplexService,
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let dispatcher = Arc::new(Dispatcher::start(
        config.num_workers,
        config.queue_capacity,
        config.shutdown_timeout,
    ));
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout)?);
    let service = MultiplexService::new(Arc::clone(&dispatcher), fetcher, config.max_urls)
        .with_read_timeout(config.read_timeout);
    let app = build_router(service, AdmissionLayer::new(config.max_connections));

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&listener.local_addr()?.to_string(), &config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(Arc::clone(&dispatcher), shutdown.clone()));

    // Open connections get `shutdown_timeout` to finish once the pool is down.
    let options = ServeOptions {
        header_read_timeout: config.read_header_timeout,
        drain_timeout: config.shutdown_timeout,
    };
    serve(listener, app, options, shutdown).await;

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Listening on {} with full config: {:#?}", addr, config);
    } else {
        tracing::info!(
            "Listening on {} with {} workers, max {} urls per request",
            addr,
            config.num_workers,
            config.max_urls
        );
    }
}

async fn shutdown_signal(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Stop the worker pool; requests still waiting on it answer 503.
    dispatcher.shutdown().await;

    // 2. Stop accepting and let open connections drain.
    shutdown.cancel();
}

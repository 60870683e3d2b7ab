use maintgate::config::Config;
use maintgate::gate::Gate;
use maintgate::pool::PoolConfig;
use maintgate::proxy::{GateServer, Upstream};
use maintgate::refresh::Refresher;
use maintgate::store::PolicyStore;
use maintgate::{PKG_NAME, VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("maintgate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(PolicyStore::new());

    let refresher = Refresher::new(&config.maintenance, Arc::clone(&store))
        .map_err(|e| anyhow::anyhow!("Failed to build policy client: {}", e))?;
    let refresher_handle = refresher.spawn(shutdown_rx.clone());

    let pool_config = PoolConfig {
        max_idle_per_host: config.upstream.pool_max_idle_per_host,
        idle_timeout: Duration::from_secs(config.upstream.pool_idle_timeout_secs),
    };
    let upstream = Upstream::new(
        config.upstream.address.clone(),
        config.upstream.request_timeout(),
        pool_config,
    );
    let gate = Arc::new(
        Gate::new(store, upstream, config.maintenance.strategy)
            .with_drain_timeout(config.maintenance.drain_timeout()),
    );

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GateServer::new(bind_addr, gate, shutdown_rx.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gate server error");
        }
    });

    wait_for_signal().await;

    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = server_handle.await;
        let _ = refresher_handle.await;
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the gate");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting maintenance gate");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        upstream = %config.upstream.address,
        request_timeout_secs = config.upstream.request_timeout_secs,
        "Server configuration"
    );
    info!(
        pool_max_idle = config.upstream.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.upstream.pool_idle_timeout_secs,
        "Connection pool settings"
    );
    info!(
        inform_url = %config.maintenance.inform_url,
        refresh_interval_secs = config.maintenance.refresh_interval_secs,
        fetch_timeout_secs = config.maintenance.fetch_timeout_secs,
        template_dir = ?config.maintenance.template_dir,
        strategy = ?config.maintenance.strategy,
        drain_timeout_ms = config.maintenance.drain_timeout_ms,
        "Maintenance policy settings"
    );
}

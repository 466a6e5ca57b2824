#[cfg(not(any(
    target_env = "musl",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "windows",
    feature = "mimalloc"
)))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;

use joulaa::core::{bind, build_runtime, serve, shutdown_signal, AppState};
use joulaa::{logging, AppConfig};

fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    logging::init(&config.log).map_err(anyhow::Error::msg)?;

    let runtime = build_runtime(config.server.worker_threads)?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let addr = config.server.socket_addr()?;
    tracing::info!(
        environment = ?config.environment,
        worker_threads = config.server.worker_threads,
        "starting joulaa"
    );

    let state = AppState::from_config(config).await?;
    let listener = bind(addr).with_context(|| format!("failed to bind {addr}"))?;
    serve(listener, state, shutdown_signal()).await?;

    tracing::info!("server stopped");
    Ok(())
}

//! Parcel agent entry point.

mod accounts;
mod app;
mod commands;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parcel=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting parcel agent");

    let path = std::env::args_os().nth(1).map(Into::into);
    let config = config::Config::load(path)?;
    tracing::info!(
        accounts = %config.accounts_path.display(),
        output = %config.output_dir.display(),
        workers = config.pipeline.workers,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}

use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn main() -> Result<(), anyhow::Error> {
    let cli = storectl::Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into()) // Otherwise it's ERROR.
        .from_env_lossy();

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()?;

    let handle = runtime.spawn(async move { cli.run().await });
    let result = runtime.block_on(handle);

    // An incomplete spawned future could otherwise block shutdown indefinitely.
    runtime.shutdown_background();

    result?
}

//! `siftd`: the document-processing and retrieval daemon.

use sift_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
  let filter = EnvFilter::try_from_env("SIFT_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_tracing();

  let config = Config::from_env()?;
  info!(
    workers = config.engine.max_concurrent_processing,
    model = %config.embedding.model,
    dimension = config.embedding.dimension,
    "Starting siftd"
  );

  let runtime = daemon::Runtime::build(&config)?;
  let cancel = runtime.cancel_token();

  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Interrupt received, shutting down");
      cancel.cancel();
    }
  });

  runtime.run().await
}

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = swerve_runtime::runtime::run().await {
        tracing::error!("Runtime exited: {e}");
        std::process::exit(1);
    }
}

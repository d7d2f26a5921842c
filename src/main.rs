use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = fire_engine::api::run_cli() {
        error!(error = %e, "Simulation failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

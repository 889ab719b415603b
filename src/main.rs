use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use native_muxer::Config;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the native messaging frames, logs must go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            error!(?error, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match native_muxer::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "native messaging channel failed");
            ExitCode::FAILURE
        }
    }
}

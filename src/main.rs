mod classifier;
mod config;
mod cqcode;
mod dispatcher;
mod error;
mod http_client;
mod logging;
mod memo;
mod model;
mod orchestrator;
mod profile;
mod ws_session;

use std::path::PathBuf;

fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let logging_config = logging::LoggingConfig::default();
    let _guard = logging::try_init(&logging_config);

    let config = match config::Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");

    if let Err(e) = runtime.block_on(orchestrator::run(config)) {
        tracing::error!(error = %e, "bridge exited with an error");
        std::process::exit(1);
    }
}

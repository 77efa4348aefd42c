use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use engine_modules::commands::{execute, Cli};
use engine_modules::core::hooks::HookRegistry;
use engine_modules::core::state::{default_data_dir, EngineState};

#[tokio::main]
async fn main() {
    engine_modules::init_logging();
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let state = match EngineState::with_data_dir(data_dir, HookRegistry::new()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialise engine: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Err(e) = execute(&state, cli.command, cancel).await {
        if e.is_cancelled() {
            warn!("{}", e);
            std::process::exit(130);
        }
        error!("{}", e);
        std::process::exit(1);
    }
}

pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{ModuleError, ModuleResult};
pub use crate::core::lifecycle::ModuleManager;
pub use crate::core::state::{EngineSettings, EngineState};

/// Structured logging to stderr. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,engine_modules=debug")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub mod app_state;
pub mod settings;

pub use app_state::EngineState;
pub use settings::{default_data_dir, EngineSettings, HttpSettings, RegistrySettings};

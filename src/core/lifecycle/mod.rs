pub mod game_args;
pub mod manager;
pub mod preserve;

pub use game_args::reconcile_game_args;
pub use manager::{
    DependencyUpdateReport, EngineMatch, InstallReport, LaunchOutcome, ManagerParts,
    ModuleManager, UpdateReport,
};
pub use preserve::{move_dir, UpdateStash};

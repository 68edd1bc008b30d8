pub mod config;
pub mod orchestrator;
pub mod scheduler;
pub mod types;

pub use config::{CenterCheck, PipelineConfig};
pub use orchestrator::PhaseMapPipeline;
pub use scheduler::{StageScheduler, StageTask};
pub use types::{
    Diagnostic, NoOpReporter, PipelineOutput, PipelineStage, PipelineStatus, ProgressReporter,
};

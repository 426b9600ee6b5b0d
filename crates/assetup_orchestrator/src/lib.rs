pub mod batch;
pub mod config;
pub mod intake;
pub mod orchestrator;
pub mod progress;
pub mod reporter;
pub mod target;

pub use batch::UploadBatch;
pub use config::PipelineConfig;
pub use intake::{FileIntake, IntakeReport, RejectedFile};
pub use orchestrator::{BatchEvent, OrchestratorHandle, StartedBatch, UploadOrchestrator};
pub use progress::ProgressAggregator;
pub use reporter::CompletionReporter;
pub use target::TargetResolver;

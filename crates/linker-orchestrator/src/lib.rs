//! Executes a compiled plan: container engines with fallback, per-step
//! clusters provisioned on a batch scheduler, and the run session that ties
//! their lifetimes to the run.

pub mod cluster;
pub mod container;
pub mod discovery;
pub mod exec;
pub mod runner;
pub mod scheduler;
pub mod session;

pub use cluster::{launch_script, ClusterHandle, ClusterLifecycle, ClusterProvisioner, ClusterState};
pub use container::{
    parse_loaded_image, ContainerEngine, ContainerRun, DockerEngine, EngineAttempt, EngineReport,
    EngineSelector, SingularityEngine,
};
pub use discovery::{
    discover_address, parse_master_address, PollPolicy, Sleeper, TokioSleeper, MASTER_MARKER,
};
pub use exec::{CommandExecutor, CommandOutput, LocalCommandExecutor};
pub use runner::{PlanRunner, RunSummary, StepOutcome};
pub use scheduler::{ArrayJob, BatchScheduler, SlurmScheduler};
pub use session::RunSession;

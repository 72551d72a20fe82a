//! Pipeline compilation: configuration loading, reconciliation against the
//! flattened schema, implementation resolution and execution planning.

pub mod config;
pub mod implementation;
pub mod pipeline;
pub mod plan;
pub mod reconcile;
pub mod results;
pub mod rules;

pub use config::{
    load_input_data, substitute_env_vars, ComputingEnvironment, Config, ContainerEngineKind,
    EnvironmentSpec, ImplementationResources, PipelineSpec, SlurmSettings, SparkSettings,
    SparkWorkers, StepBinding,
};
pub use implementation::{
    resolve_implementation, Implementation, ImplementationMetadata, MetadataStore,
    YamlMetadataStore,
};
pub use pipeline::Pipeline;
pub use plan::{
    step_id, ExecutionPlan, ExecutionStep, CLUSTER_ADDRESS_ENV, DIAGNOSTICS_DIR_ENV,
    OUTPUT_PATHS_ENV,
};
pub use reconcile::reconcile;
pub use results::{copy_source_files, prepare_results_directory};
pub use rules::RuleFile;

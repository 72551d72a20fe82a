//! Pipeline, input-data and computing-environment YAML loading.
//!
//! `${VAR}` references are substituted from the process environment before
//! parsing; every missing variable is reported at once.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use linker_types::{LinkerError, Result};
use regex::Regex;
use serde::Deserialize;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(value) => value,
            Err(_) => {
                missing.push(cap[1].to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(LinkerError::Config(format!(
            "Missing environment variable(s): {}",
            missing.join(", ")
        )));
    }
    Ok(result.into_owned())
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LinkerError::Config(format!(
            "Failed to read {what} file '{}': {e}",
            path.display()
        ))
    })?;
    let substituted = substitute_env_vars(&content)?;
    serde_yaml::from_str(&substituted).map_err(|e| {
        LinkerError::Config(format!(
            "Failed to parse {what} file '{}': {e}",
            path.display()
        ))
    })
}

// ---------------------------------------------------------------------------
// Pipeline specification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    pub steps: IndexMap<String, StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    pub implementation: ImplementationSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImplementationSpec {
    pub name: String,
    #[serde(default)]
    pub configuration: Option<IndexMap<String, serde_yaml::Value>>,
}

/// One step of the user's pipeline bound to a named implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepBinding {
    pub step_name: String,
    pub implementation_name: String,
    pub implementation_config: IndexMap<String, serde_yaml::Value>,
}

impl StepBinding {
    pub fn new(step_name: impl Into<String>, implementation_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            implementation_name: implementation_name.into(),
            implementation_config: IndexMap::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.implementation_config.insert(key.to_string(), value.into());
        self
    }
}

impl PipelineSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let substituted = substitute_env_vars(yaml)?;
        serde_yaml::from_str(&substituted)
            .map_err(|e| LinkerError::Config(format!("Failed to parse pipeline specification: {e}")))
    }

    /// Step bindings in declaration order.
    pub fn bindings(&self) -> Vec<StepBinding> {
        self.steps
            .iter()
            .map(|(step, spec)| StepBinding {
                step_name: step.clone(),
                implementation_name: spec.implementation.name.clone(),
                implementation_config: spec
                    .implementation
                    .configuration
                    .clone()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Computing environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputingEnvironment {
    #[default]
    Local,
    Slurm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngineKind {
    Docker,
    Singularity,
    #[default]
    Undefined,
}

impl std::fmt::Display for ContainerEngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContainerEngineKind::Docker => "docker",
            ContainerEngineKind::Singularity => "singularity",
            ContainerEngineKind::Undefined => "undefined",
        })
    }
}

/// Per-step resource request. `memory` is in GB, `time_limit` in hours.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImplementationResources {
    #[serde(default = "one")]
    pub memory: u32,
    #[serde(default = "one")]
    pub cpus: u32,
    #[serde(default = "one")]
    pub time_limit: u32,
}

impl Default for ImplementationResources {
    fn default() -> Self {
        Self {
            memory: 1,
            cpus: 1,
            time_limit: 1,
        }
    }
}

fn one() -> u32 {
    1
}

fn two() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlurmSettings {
    pub account: String,
    pub partition: String,
}

/// Worker pool request for a distributed compute cluster. `mem_per_cpu` is in
/// GB, `time_limit` in hours.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SparkWorkers {
    #[serde(default = "two")]
    pub num_workers: u32,
    #[serde(default = "one")]
    pub cpus_per_task: u32,
    #[serde(default = "one")]
    pub mem_per_cpu: u32,
    #[serde(default = "one")]
    pub time_limit: u32,
}

impl Default for SparkWorkers {
    fn default() -> Self {
        Self {
            num_workers: 2,
            cpus_per_task: 1,
            mem_per_cpu: 1,
            time_limit: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SparkSettings {
    #[serde(default)]
    pub workers: SparkWorkers,
    #[serde(default)]
    pub keep_alive: bool,
    /// Container image the cluster processes run in.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub computing_environment: ComputingEnvironment,
    #[serde(default)]
    pub container_engine: ContainerEngineKind,
    #[serde(default)]
    pub implementation_resources: ImplementationResources,
    #[serde(default)]
    pub slurm: Option<SlurmSettings>,
    #[serde(default)]
    pub spark: Option<SparkSettings>,
}

impl EnvironmentSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let substituted = substitute_env_vars(yaml)?;
        let env: Self = serde_yaml::from_str(&substituted).map_err(|e| {
            LinkerError::Config(format!("Failed to parse computing environment: {e}"))
        })?;
        env.check()?;
        Ok(env)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(LinkerError::Config(format!(
                "Computing environment is expected to be a path to an existing yaml file. Input was: '{}'",
                path.display()
            )));
        }
        let env: Self = read_yaml(path, "computing environment")?;
        env.check()?;
        Ok(env)
    }

    fn check(&self) -> Result<()> {
        if self.computing_environment == ComputingEnvironment::Slurm && self.slurm.is_none() {
            return Err(LinkerError::Config(
                "computing_environment 'slurm' requires a 'slurm' section with account and partition"
                    .into(),
            ));
        }
        if self.computing_environment == ComputingEnvironment::Local {
            if let Some(spark) = &self.spark {
                tracing::warn!(
                    num_workers = spark.workers.num_workers,
                    "Spark resource requests are not supported in a local computing environment; \
                     these requests will be ignored and the implementation is responsible for \
                     starting its own cluster inside its container"
                );
            }
        }
        Ok(())
    }

    pub fn is_slurm(&self) -> bool {
        self.computing_environment == ComputingEnvironment::Slurm
    }

    /// Cluster settings that actually apply: only a Slurm environment provisions clusters.
    pub fn cluster_settings(&self) -> Option<&SparkSettings> {
        if self.is_slurm() {
            self.spark.as_ref()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Input data
// ---------------------------------------------------------------------------

/// Load the label -> path mapping and resolve every path to an absolute one.
pub fn load_input_data(path: &Path) -> Result<Vec<PathBuf>> {
    let entries: IndexMap<String, PathBuf> = read_yaml(path, "input data")?;
    resolve_input_paths(entries.into_values())
}

pub fn resolve_input_paths(paths: impl IntoIterator<Item = PathBuf>) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::new();
    let mut missing = Vec::new();
    for path in paths {
        match std::fs::canonicalize(&path) {
            Ok(abs) => resolved.push(abs),
            Err(_) => missing.push(path.display().to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(LinkerError::Config(format!(
            "Cannot find input data: {}",
            missing.join(", ")
        )));
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Everything the operator handed us for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineSpec,
    pub input_data: Vec<PathBuf>,
    pub environment: EnvironmentSpec,
    /// Source files, copied into the results directory for provenance.
    pub source_files: Vec<PathBuf>,
}

impl Config {
    pub fn load(
        pipeline_path: &Path,
        input_data_path: &Path,
        environment_path: Option<&Path>,
    ) -> Result<Self> {
        let pipeline: PipelineSpec = read_yaml(pipeline_path, "pipeline specification")?;
        let input_data = load_input_data(input_data_path)?;
        let environment = match environment_path {
            Some(path) => EnvironmentSpec::load(path)?,
            None => EnvironmentSpec::default(),
        };
        let mut source_files = vec![pipeline_path.to_path_buf(), input_data_path.to_path_buf()];
        source_files.extend(environment_path.map(Path::to_path_buf));

        tracing::debug!(
            steps = pipeline.steps.len(),
            inputs = input_data.len(),
            environment = ?environment.computing_environment,
            engine = %environment.container_engine,
            "loaded configuration"
        );
        Ok(Self {
            pipeline,
            input_data,
            environment,
            source_files,
        })
    }

    pub fn new(pipeline: PipelineSpec, input_data: Vec<PathBuf>, environment: EnvironmentSpec) -> Self {
        Self {
            pipeline,
            input_data,
            environment,
            source_files: Vec::new(),
        }
    }

    pub fn bindings(&self) -> Vec<StepBinding> {
        self.pipeline.bindings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_substitution() {
        std::env::set_var("LINKER_TEST_ACCOUNT", "proj_simscience");
        let result = substitute_env_vars("account: ${LINKER_TEST_ACCOUNT}").unwrap();
        assert_eq!(result, "account: proj_simscience");
        std::env::remove_var("LINKER_TEST_ACCOUNT");
    }

    #[test]
    fn missing_env_vars_all_reported() {
        let err = substitute_env_vars("${LINKER_MISSING_X} and ${LINKER_MISSING_Y}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("LINKER_MISSING_X"));
        assert!(msg.contains("LINKER_MISSING_Y"));
    }

    #[test]
    fn pipeline_bindings_keep_declared_order() {
        let spec = PipelineSpec::from_yaml_str(
            r#"
steps:
  step_2:
    implementation:
      name: step_2_python_pandas
  step_1:
    implementation:
      name: step_1_python_pandas
      configuration:
        DUMMY_CONTAINER_INCREMENT: 99
"#,
        )
        .unwrap();
        let bindings = spec.bindings();
        assert_eq!(bindings[0].step_name, "step_2");
        assert_eq!(bindings[1].implementation_name, "step_1_python_pandas");
        assert_eq!(
            bindings[1].implementation_config["DUMMY_CONTAINER_INCREMENT"],
            serde_yaml::Value::from(99)
        );
        assert!(bindings[0].implementation_config.is_empty());
    }

    #[test]
    fn environment_defaults_to_local_undefined() {
        let env = EnvironmentSpec::from_yaml_str("{}").unwrap();
        assert_eq!(env.computing_environment, ComputingEnvironment::Local);
        assert_eq!(env.container_engine, ContainerEngineKind::Undefined);
        assert_eq!(env.implementation_resources, ImplementationResources::default());
        assert!(env.cluster_settings().is_none());
    }

    #[test]
    fn slurm_environment_with_spark() {
        let env = EnvironmentSpec::from_yaml_str(
            r#"
computing_environment: slurm
container_engine: singularity
slurm:
  account: proj
  partition: all.q
implementation_resources:
  memory: 50
  cpus: 10
  time_limit: 3
spark:
  workers:
    num_workers: 3
    cpus_per_task: 2
    mem_per_cpu: 2
    time_limit: 1
"#,
        )
        .unwrap();
        assert!(env.is_slurm());
        let spark = env.cluster_settings().unwrap();
        assert_eq!(spark.workers.num_workers, 3);
        assert!(!spark.keep_alive);
        assert_eq!(env.implementation_resources.memory, 50);
    }

    #[test]
    fn slurm_requires_slurm_section() {
        let err = EnvironmentSpec::from_yaml_str("computing_environment: slurm").unwrap_err();
        assert!(matches!(err, LinkerError::Config(_)));
    }

    #[test]
    fn unknown_container_engine_rejected() {
        let err = EnvironmentSpec::from_yaml_str("container_engine: podman").unwrap_err();
        assert!(err.to_string().contains("podman"));
    }

    #[test]
    fn spark_on_local_is_ignored() {
        let env = EnvironmentSpec::from_yaml_str(
            "computing_environment: local\nspark:\n  keep_alive: true\n",
        )
        .unwrap();
        assert!(env.spark.is_some());
        assert!(env.cluster_settings().is_none());
    }

    #[test]
    fn missing_environment_file() {
        let err = EnvironmentSpec::load(Path::new("/no/such/environment.yaml")).unwrap_err();
        assert!(err.to_string().contains("existing yaml file"));
    }

    #[test]
    fn input_data_lists_every_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("file1.csv");
        std::fs::write(&present, "foo,bar,counter\n1,2,3\n").unwrap();
        let yaml = dir.path().join("input_data.yaml");
        std::fs::write(
            &yaml,
            format!(
                "foo: {}\nbar: {}\nbaz: {}\n",
                present.display(),
                dir.path().join("gone1.csv").display(),
                dir.path().join("gone2.csv").display()
            ),
        )
        .unwrap();
        let err = load_input_data(&yaml).unwrap_err().to_string();
        assert!(err.contains("gone1.csv"));
        assert!(err.contains("gone2.csv"));
        assert!(!err.contains("file1.csv"));
    }

    #[test]
    fn config_load_records_source_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("file1.csv");
        std::fs::write(&data, "foo,bar,counter\n1,2,3\n").unwrap();
        let input_yaml = dir.path().join("input_data.yaml");
        std::fs::write(&input_yaml, format!("foo: {}\n", data.display())).unwrap();
        let pipeline_yaml = dir.path().join("pipeline.yaml");
        std::fs::write(
            &pipeline_yaml,
            "steps:\n  step_1:\n    implementation:\n      name: step_1_python_pandas\n",
        )
        .unwrap();

        let config = Config::load(&pipeline_yaml, &input_yaml, None).unwrap();
        assert_eq!(config.source_files.len(), 2);
        assert_eq!(config.input_data.len(), 1);
        assert!(config.input_data[0].is_absolute());
        assert_eq!(config.bindings().len(), 1);
    }
}

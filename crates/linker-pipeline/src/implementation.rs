//! Implementation metadata registry and resolution of step bindings.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use linker_types::{LinkerError, Result};
use serde::Deserialize;

use crate::config::{ContainerEngineKind, StepBinding};

/// Registry entry describing how to run one implementation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImplementationMetadata {
    /// The schema step this implementation is written for.
    pub step: String,
    /// Container path without extension; `.tar.gz` and `.sif` are appended.
    pub image_path: PathBuf,
    pub script_cmd: String,
    #[serde(default)]
    pub requires_spark: bool,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

/// Lookup of implementation metadata by name.
pub trait MetadataStore: Send + Sync {
    fn get(&self, name: &str) -> Option<&ImplementationMetadata>;
    fn names(&self) -> Vec<&str>;
}

/// File-backed [`MetadataStore`]: a YAML mapping of name -> metadata.
#[derive(Debug, Clone, Default)]
pub struct YamlMetadataStore {
    entries: IndexMap<String, ImplementationMetadata>,
}

impl YamlMetadataStore {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkerError::Config(format!(
                "Failed to read implementation metadata '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let entries = serde_yaml::from_str(yaml).map_err(|e| {
            LinkerError::Config(format!("Failed to parse implementation metadata: {e}"))
        })?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: IndexMap<String, ImplementationMetadata>) -> Self {
        Self { entries }
    }
}

impl MetadataStore for YamlMetadataStore {
    fn get(&self, name: &str) -> Option<&ImplementationMetadata> {
        self.entries.get(name)
    }

    fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// A step binding joined with its registry entry. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub step_name: String,
    pub metadata: ImplementationMetadata,
    pub config: IndexMap<String, serde_yaml::Value>,
}

fn append_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut path: OsString = stem.as_os_str().to_owned();
    path.push(ext);
    PathBuf::from(path)
}

/// Render a configuration value as an environment variable value.
pub fn stringify(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

impl Implementation {
    pub fn docker_archive(&self) -> PathBuf {
        append_extension(&self.metadata.image_path, ".tar.gz")
    }

    pub fn singularity_image(&self) -> PathBuf {
        append_extension(&self.metadata.image_path, ".sif")
    }

    pub fn requires_cluster(&self) -> bool {
        self.metadata.requires_spark
    }

    /// Gate file touched once this implementation's inputs validate.
    pub fn validation_filename(&self) -> String {
        format!("{}_validator", self.name)
    }

    /// Metadata `env` overlaid with the pipeline's per-step configuration.
    pub fn environment_variables(&self) -> IndexMap<String, String> {
        let mut vars = self.metadata.env.clone();
        for (key, value) in &self.config {
            vars.insert(key.clone(), stringify(value));
        }
        vars
    }
}

/// Join `binding` with its metadata and check it can run under `engine`.
/// Every problem found is returned in one [`LinkerError::Implementation`],
/// not just the first.
pub fn resolve_implementation(
    store: &dyn MetadataStore,
    binding: &StepBinding,
    engine: ContainerEngineKind,
) -> Result<Implementation> {
    let invalid = |errors: Vec<String>| LinkerError::Implementation {
        implementation: binding.implementation_name.clone(),
        errors,
    };
    let Some(metadata) = store.get(&binding.implementation_name) else {
        return Err(invalid(vec![format!(
            "Implementation '{}' is not defined in implementation metadata. Available: [{}]",
            binding.implementation_name,
            store.names().join(", ")
        )]));
    };

    let implementation = Implementation {
        name: binding.implementation_name.clone(),
        step_name: binding.step_name.clone(),
        metadata: metadata.clone(),
        config: binding.implementation_config.clone(),
    };

    let mut errors = Vec::new();
    if metadata.step != binding.step_name {
        errors.push(format!(
            "Implementation metadata step '{}' does not match pipeline configuration step '{}'",
            metadata.step, binding.step_name
        ));
    }

    let archive = implementation.docker_archive();
    let image = implementation.singularity_image();
    match engine {
        ContainerEngineKind::Docker if !archive.is_file() => {
            errors.push(format!("Container '{}' does not exist.", archive.display()));
        }
        ContainerEngineKind::Singularity if !image.is_file() => {
            errors.push(format!("Container '{}' does not exist.", image.display()));
        }
        ContainerEngineKind::Undefined if !archive.is_file() && !image.is_file() => {
            errors.push(format!(
                "Container '{}' does not exist as a .tar.gz archive or a .sif image.",
                metadata.image_path.display()
            ));
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(implementation)
    } else {
        Err(invalid(errors))
    }
}

//! Shared types and errors for the linker pipeline compiler.
//!
//! This crate provides the foundational types used across all other linker crates:
//! - `LinkerError`: unified error taxonomy
//! - `ValidationReport`: every pre-execution problem found in one pass

use indexmap::IndexMap;
use serde::Serialize;

/// Unified error type for all linker subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LinkerError {
    // === Compilation Errors ===
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Pipeline validation failed:\n{0}")]
    Validation(ValidationReport),

    #[error("Implementation '{implementation}' is invalid: {}", .errors.join("; "))]
    Implementation {
        implementation: String,
        errors: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Execution Errors ===
    #[error("Container engine '{engine}' failed: {message}")]
    ContainerEngine { engine: String, message: String },

    #[error("All container engines failed for step '{step}'. Docker: {docker}. Singularity: {singularity}")]
    ContainerEnginesExhausted {
        step: String,
        docker: String,
        singularity: String,
    },

    #[error("Cluster provisioning failed for step '{step}': {message}")]
    ClusterProvisioning { step: String, message: String },

    #[error("Timed out discovering the cluster address for step '{step}' after {attempts} attempts ({elapsed_secs}s)")]
    ClusterDiscoveryTimeout {
        step: String,
        attempts: usize,
        elapsed_secs: u64,
    },

    #[error("No results found for pipeline step ID {step_id} in results directory '{results_dir}'")]
    StepOutput {
        step_id: String,
        results_dir: String,
    },

    #[error("Input validation failed for step '{step_id}': {}", .errors.join("; "))]
    InputValidation {
        step_id: String,
        errors: Vec<String>,
    },

    #[error("Run cancelled")]
    Cancelled,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl LinkerError {
    /// Returns `true` if another container engine may still succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkerError::ContainerEngine { .. })
    }

    /// Returns `true` if the error is found before any step runs.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            LinkerError::Schema(_)
                | LinkerError::Validation(_)
                | LinkerError::Implementation { .. }
                | LinkerError::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, LinkerError>`.
pub type Result<T> = std::result::Result<T, LinkerError>;

// ---------------------------------------------------------------------------
// ValidationReport: aggregated pre-execution errors
// ---------------------------------------------------------------------------

/// Every schema, configuration and implementation problem found while compiling a
/// pipeline. Built in a single pass and consumed immediately to abort or proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    #[serde(rename = "SCHEMA ERRORS", skip_serializing_if = "Vec::is_empty")]
    pub schema_errors: Vec<String>,
    #[serde(rename = "PIPELINE ERRORS", skip_serializing_if = "Vec::is_empty")]
    pub pipeline_errors: Vec<String>,
    #[serde(rename = "IMPLEMENTATION ERRORS", skip_serializing_if = "IndexMap::is_empty")]
    pub implementation_errors: IndexMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.schema_errors.is_empty()
            && self.pipeline_errors.is_empty()
            && self.implementation_errors.is_empty()
    }

    /// Total number of individual error messages.
    pub fn len(&self) -> usize {
        self.schema_errors.len()
            + self.pipeline_errors.len()
            + self
                .implementation_errors
                .values()
                .map(Vec::len)
                .sum::<usize>()
    }

    pub fn add_schema_error(&mut self, message: impl Into<String>) {
        self.schema_errors.push(message.into());
    }

    pub fn add_pipeline_error(&mut self, message: impl Into<String>) {
        self.pipeline_errors.push(message.into());
    }

    /// Record errors for one implementation. Empty lists are ignored so that the
    /// report only lists implementations that actually failed.
    pub fn add_implementation_errors(&mut self, implementation: &str, errors: Vec<String>) {
        if errors.is_empty() {
            return;
        }
        self.implementation_errors
            .entry(implementation.to_string())
            .or_default()
            .extend(errors);
    }

    /// Render the report as a YAML document for the operator.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// `Ok(())` when empty, otherwise the report wrapped in [`LinkerError::Validation`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(LinkerError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for err in &self.schema_errors {
            writeln!(f, "  [schema] {err}")?;
        }
        for err in &self.pipeline_errors {
            writeln!(f, "  [pipeline] {err}")?;
        }
        for (name, errors) in &self.implementation_errors {
            for err in errors {
                writeln!(f, "  [implementation {name}] {err}")?;
            }
        }
        Ok(())
    }
}

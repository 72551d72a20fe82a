//! Linear execution plan: step IDs and per-step file locations.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use linker_schema::{SchemaGraph, StepNode, RESULT_FILE};
use linker_types::{LinkerError, Result};

use crate::implementation::Implementation;

pub const OUTPUT_PATHS_ENV: &str = "DUMMY_CONTAINER_OUTPUT_PATHS";
pub const DIAGNOSTICS_DIR_ENV: &str = "DUMMY_CONTAINER_DIAGNOSTICS_DIRECTORY";
pub const CLUSTER_ADDRESS_ENV: &str = "DUMMY_CONTAINER_SPARK_MASTER_URL";

pub const INTERMEDIATE_DIR: &str = "intermediate";
pub const DIAGNOSTICS_DIR: &str = "diagnostics";

/// One positioned, resolved step ready to run.
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub index: usize,
    pub step_id: String,
    pub implementation: Implementation,
    /// The flattened schema node this step executes.
    pub node: StepNode,
    pub input_files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub diagnostics_dir: PathBuf,
    /// Files delivered through each input slot's environment binding.
    pub slot_inputs: IndexMap<String, Vec<PathBuf>>,
}

impl ExecutionStep {
    pub fn result_file(&self) -> PathBuf {
        self.output_dir.join(RESULT_FILE)
    }

    /// Create the output and diagnostics directories. Idempotent.
    pub fn prepare_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.diagnostics_dir)?;
        Ok(())
    }

    /// Environment handed to the implementation's container.
    pub fn environment(&self) -> Result<IndexMap<String, String>> {
        let mut env = IndexMap::new();
        for (var, files) in &self.slot_inputs {
            env.insert(var.clone(), json_paths(files)?);
        }
        env.insert(
            OUTPUT_PATHS_ENV.to_string(),
            self.result_file().display().to_string(),
        );
        env.insert(
            DIAGNOSTICS_DIR_ENV.to_string(),
            self.diagnostics_dir.display().to_string(),
        );
        env.extend(self.implementation.environment_variables());
        Ok(env)
    }

    /// Host directories the container needs access to.
    pub fn bind_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let inputs = self
            .input_files
            .iter()
            .chain(self.slot_inputs.values().flatten())
            .filter_map(|f| f.parent().map(Path::to_path_buf));
        for path in inputs.chain([self.output_dir.clone(), self.diagnostics_dir.clone()]) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }
}

fn json_paths(files: &[PathBuf]) -> Result<String> {
    let strings: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    Ok(serde_json::to_string(&strings)?)
}

/// `zero_pad(index + 1, width = len(str(total))) + "_" + step_name`.
pub fn step_id(index: usize, total: usize, step_name: &str) -> String {
    let width = total.to_string().len();
    format!("{:0width$}_{step_name}", index + 1)
}

/// The ordered, immutable sequence of steps for one run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    steps: Vec<ExecutionStep>,
    results_dir: PathBuf,
}

impl ExecutionPlan {
    /// Pair the flattened schema's implemented steps with `implementations`
    /// (already reconciled, same order) and lay out their files under `results_dir`.
    pub fn build(
        schema: &SchemaGraph,
        implementations: Vec<Implementation>,
        input_files: &[PathBuf],
        results_dir: &Path,
    ) -> Result<Self> {
        let nodes = schema.implemented_steps()?;
        if nodes.len() != implementations.len() {
            return Err(LinkerError::Other(format!(
                "Cannot plan {} implementations against {} schema steps",
                implementations.len(),
                nodes.len()
            )));
        }

        let total = nodes.len();
        let mut steps: Vec<ExecutionStep> = Vec::with_capacity(total);
        for (index, (node, implementation)) in nodes.into_iter().zip(implementations).enumerate() {
            let step_id = step_id(index, total, &implementation.step_name);
            let output_dir = if index + 1 == total {
                results_dir.to_path_buf()
            } else {
                results_dir.join(INTERMEDIATE_DIR).join(&step_id)
            };
            let diagnostics_dir = results_dir.join(DIAGNOSTICS_DIR).join(&step_id);
            let step_inputs = match steps.last() {
                Some(previous) => vec![previous.result_file()],
                None => input_files.to_vec(),
            };

            let mut slot_inputs = IndexMap::new();
            for slot in &node.input_slots {
                let Some(var) = &slot.env_var else { continue };
                let fed_by_source = schema
                    .incoming_edges(&node.name)
                    .filter(|e| e.dest_slot == slot.name)
                    .any(|e| schema.node(&e.source_step).is_some_and(StepNode::is_input));
                let files = if fed_by_source {
                    input_files.to_vec()
                } else {
                    step_inputs.clone()
                };
                slot_inputs.insert(var.clone(), files);
            }

            steps.push(ExecutionStep {
                index,
                step_id,
                implementation,
                node: node.clone(),
                input_files: step_inputs,
                output_dir,
                diagnostics_dir,
                slot_inputs,
            });
        }

        tracing::debug!(steps = steps.len(), results_dir = %results_dir.display(), "built execution plan");
        Ok(Self {
            steps,
            results_dir: results_dir.to_path_buf(),
        })
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The final result artifact of the whole pipeline.
    pub fn final_result(&self) -> PathBuf {
        self.results_dir.join(RESULT_FILE)
    }
}

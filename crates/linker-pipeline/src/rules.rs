//! Snakemake rule-file generation for an execution plan.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use linker_schema::{StepNode, Validator};
use linker_types::Result;

use crate::config::EnvironmentSpec;
use crate::plan::{ExecutionPlan, ExecutionStep, CLUSTER_ADDRESS_ENV};

pub const RULE_FILE_NAME: &str = "Snakefile";
pub const VALIDATIONS_DIR: &str = "input_validations";

fn py_list(items: &[PathBuf]) -> String {
    let quoted: Vec<String> = items.iter().map(|p| format!("'{}'", p.display())).collect();
    format!("[{}]", quoted.join(", "))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn input_validator(node: &StepNode) -> Validator {
    node.input_slots
        .first()
        .map(|s| s.validator)
        .unwrap_or(Validator::AnyFile)
}

/// Renders a plan as the rule file consumed by the external DAG engine.
pub struct RuleFile<'a> {
    plan: &'a ExecutionPlan,
    environment: &'a EnvironmentSpec,
    final_validator: Validator,
    cluster_addresses: IndexMap<String, String>,
}

impl<'a> RuleFile<'a> {
    pub fn new(plan: &'a ExecutionPlan, environment: &'a EnvironmentSpec) -> Self {
        Self {
            plan,
            environment,
            final_validator: Validator::DummyTable,
            cluster_addresses: IndexMap::new(),
        }
    }

    /// Validator applied to the pipeline's final result.
    pub fn with_final_validator(mut self, validator: Validator) -> Self {
        self.final_validator = validator;
        self
    }

    /// Export a discovered cluster address to the given step's rule.
    pub fn with_cluster_address(mut self, step_id: &str, address: &str) -> Self {
        self.cluster_addresses
            .insert(step_id.to_string(), address.to_string());
        self
    }

    pub fn path(&self) -> PathBuf {
        self.plan.results_dir().join(RULE_FILE_NAME)
    }

    fn validation_file(&self, name: &str) -> PathBuf {
        self.plan.results_dir().join(VALIDATIONS_DIR).join(name)
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::from("from linker.utilities import validation_utils\n");
        let final_output = vec![self.plan.final_result()];
        let final_validation = self.validation_file("final_validator");

        // The first rule is the DAG target, so it precedes everything else.
        let _ = write!(
            out,
            "\nrule all:\n    input:\n        final_output={},\n        validation='{}'\n    message: 'Grabbing final output'\n",
            py_list(&final_output),
            final_validation.display()
        );
        self.render_validation(&mut out, "results", &final_output, &final_validation, self.final_validator);

        for step in self.plan.steps() {
            let gate = self.validation_file(&step.implementation.validation_filename());
            self.render_validation(
                &mut out,
                &step.implementation.name,
                &step.input_files,
                &gate,
                input_validator(&step.node),
            );
            self.render_implementation(&mut out, step, &gate)?;
        }
        Ok(out)
    }

    fn render_validation(
        &self,
        out: &mut String,
        name: &str,
        inputs: &[PathBuf],
        gate: &Path,
        validator: Validator,
    ) {
        let _ = write!(
            out,
            "\nrule:\n    name: \"{name}_validator\"\n    input: {}\n    output: touch(\"{}\")\n    localrule: True\n    message: \"Validating {name} input\"\n    run:\n        for f in input:\n            validation_utils.{}(f)\n",
            py_list(inputs),
            gate.display(),
            validator.function_name()
        );
    }

    fn render_implementation(&self, out: &mut String, step: &ExecutionStep, gate: &Path) -> Result<()> {
        let implementation = &step.implementation;
        let diagnostics = step.diagnostics_dir.display();
        let _ = write!(
            out,
            "\nrule:\n    name: \"{name}\"\n    message: \"Running {step_name} implementation: {name}\"\n    input:\n        implementation_inputs={inputs},\n        validation=\"{gate}\"\n    output: {output}\n    log: \"{diagnostics}/{name}-output.log\"\n    container: \"{image}\"\n",
            name = implementation.name,
            step_name = implementation.step_name,
            inputs = py_list(&step.input_files),
            gate = gate.display(),
            output = py_list(&[step.result_file()]),
            image = implementation.singularity_image().display(),
        );

        if let Some(slurm) = self.environment.slurm.as_ref().filter(|_| self.environment.is_slurm()) {
            let resources = &self.environment.implementation_resources;
            let _ = write!(
                out,
                "    resources:\n        slurm_account='{account}',\n        slurm_partition='{partition}',\n        mem_mb={mem},\n        runtime={runtime},\n        cpus_per_task={cpus},\n        slurm_extra=\"--output '{diagnostics}/{name}-slurm-%j.log'\"\n",
                account = slurm.account,
                partition = slurm.partition,
                mem = resources.memory * 1024,
                runtime = resources.time_limit * 60,
                cpus = resources.cpus,
                name = implementation.name,
            );
        }

        out.push_str("    shell:\n        '''\n");
        let mut env = step.environment()?;
        if let Some(address) = self.cluster_addresses.get(&step.step_id) {
            env.insert(CLUSTER_ADDRESS_ENV.to_string(), address.clone());
        }
        for (key, value) in &env {
            let _ = writeln!(out, "        export {key}={}", shell_quote(value));
        }
        let _ = write!(
            out,
            "        {} > {{log}} 2>&1\n        '''\n",
            implementation.metadata.script_cmd
        );
        Ok(())
    }

    /// Write the rule file into the results directory, replacing any existing one.
    pub fn write(&self) -> Result<PathBuf> {
        let path = self.path();
        if path.is_file() {
            tracing::warn!(path = %path.display(), "rule file already exists, overwriting");
        }
        std::fs::write(&path, self.render()?)?;
        tracing::info!(path = %path.display(), "wrote rule file");
        Ok(path)
    }
}

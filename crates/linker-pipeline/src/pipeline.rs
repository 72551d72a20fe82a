//! Single-pass compilation of schema + configuration + metadata into a
//! validated pipeline.

use std::path::Path;

use linker_schema::{error_messages, validate_and_flatten, SchemaGraph};
use linker_types::{LinkerError, Result, ValidationReport};

use crate::config::Config;
use crate::implementation::{resolve_implementation, Implementation, MetadataStore};
use crate::plan::ExecutionPlan;
use crate::reconcile::reconcile;

/// A configuration that has passed every pre-execution check.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub config: Config,
    /// The flattened schema.
    pub schema: SchemaGraph,
    pub implementations: Vec<Implementation>,
}

/// Outcome of the validation pass: the report, and the compiled pieces when
/// nothing went wrong.
struct Compiled {
    report: ValidationReport,
    schema: Option<SchemaGraph>,
    implementations: Vec<Implementation>,
}

fn compile(config: &Config, schema: &SchemaGraph, store: &dyn MetadataStore) -> Compiled {
    let mut report = ValidationReport::new();
    let bindings = config.bindings();

    let (diagnostics, flat) = validate_and_flatten(schema);
    for message in error_messages(&diagnostics) {
        report.add_schema_error(message);
    }

    if let Some(flat) = &flat {
        match flat.step_names() {
            Ok(names) => {
                for message in reconcile(&names, &bindings) {
                    report.add_pipeline_error(message);
                }
            }
            Err(err) => report.add_schema_error(err.to_string()),
        }
    }

    let mut implementations = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        match resolve_implementation(store, binding, config.environment.container_engine) {
            Ok(implementation) => implementations.push(implementation),
            Err(LinkerError::Implementation {
                implementation,
                errors,
            }) => report.add_implementation_errors(&implementation, errors),
            Err(other) => report
                .add_implementation_errors(&binding.implementation_name, vec![other.to_string()]),
        }
    }

    Compiled {
        report,
        schema: flat,
        implementations,
    }
}

impl Pipeline {
    /// Validate everything up front and collect every problem into one report.
    pub fn check(
        config: &Config,
        schema: &SchemaGraph,
        store: &dyn MetadataStore,
    ) -> ValidationReport {
        compile(config, schema, store).report
    }

    /// Compile `config` against `schema`. Fails with
    /// [`LinkerError::Validation`] carrying the full report if anything is wrong.
    pub fn new(config: Config, schema: &SchemaGraph, store: &dyn MetadataStore) -> Result<Self> {
        let Compiled {
            report,
            schema,
            implementations,
        } = compile(&config, schema, store);

        if !report.is_empty() {
            tracing::error!(errors = report.len(), "pipeline validation failed");
        }
        report.into_result()?;
        let Some(schema) = schema else {
            return Err(LinkerError::Schema("Schema could not be flattened".into()));
        };

        tracing::info!(steps = implementations.len(), "pipeline validated");
        Ok(Self {
            config,
            schema,
            implementations,
        })
    }

    pub fn plan(&self, results_dir: &Path) -> Result<ExecutionPlan> {
        ExecutionPlan::build(
            &self.schema,
            self.implementations.clone(),
            &self.config.input_data,
            results_dir,
        )
    }

    /// `true` if any step needs a cluster that this environment will provision.
    pub fn requires_cluster(&self) -> bool {
        self.config.environment.cluster_settings().is_some()
            && self.implementations.iter().any(Implementation::requires_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentSpec, PipelineSpec};
    use crate::implementation::YamlMetadataStore;
    use linker_schema::builtin;

    fn metadata(dir: &Path, steps: &[&str]) -> YamlMetadataStore {
        let mut yaml = String::new();
        for step in steps {
            yaml.push_str(&format!(
                "{step}_python_pandas:\n  step: {step}\n  image_path: {}/python_pandas\n  script_cmd: python /dummy_step.py\n",
                dir.display()
            ));
        }
        YamlMetadataStore::from_yaml_str(&yaml).unwrap()
    }

    fn config(steps: &[&str]) -> Config {
        let mut yaml = String::from("steps:\n");
        for step in steps {
            yaml.push_str(&format!(
                "  {step}:\n    implementation:\n      name: {step}_python_pandas\n"
            ));
        }
        Config::new(
            PipelineSpec::from_yaml_str(&yaml).unwrap(),
            vec![],
            EnvironmentSpec::default(),
        )
    }

    #[test]
    fn valid_pipeline_compiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("python_pandas.tar.gz"), b"x").unwrap();
        let store = metadata(dir.path(), &["step_1"]);
        let pipeline =
            Pipeline::new(config(&["step_1"]), &builtin("integration").unwrap(), &store).unwrap();
        assert_eq!(pipeline.implementations.len(), 1);
        assert!(!pipeline.requires_cluster());
        let plan = pipeline.plan(dir.path()).unwrap();
        assert_eq!(plan.steps()[0].step_id, "1_step_1");
    }

    #[test]
    fn every_problem_lands_in_one_report() {
        let dir = tempfile::tempdir().unwrap();
        // No container artifacts on disk, and step_2 is bound to step_1's metadata.
        let store = metadata(dir.path(), &["step_1"]);
        let cfg = Config::new(
            PipelineSpec::from_yaml_str(
                "steps:\n  step_2:\n    implementation:\n      name: step_1_python_pandas\n  step_1:\n    implementation:\n      name: missing_impl\n",
            )
            .unwrap(),
            vec![],
            EnvironmentSpec::default(),
        );
        let report = Pipeline::check(&cfg, &builtin("development").unwrap(), &store);

        assert!(report.schema_errors.is_empty());
        assert!(!report.pipeline_errors.is_empty());
        assert_eq!(report.implementation_errors.len(), 2);
        assert_eq!(report.implementation_errors["step_1_python_pandas"].len(), 2);

        match Pipeline::new(cfg, &builtin("development").unwrap(), &store) {
            Err(LinkerError::Validation(r)) => assert_eq!(r, report),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn order_mismatch_is_a_pipeline_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("python_pandas.tar.gz"), b"x").unwrap();
        let steps = ["step_1b", "step_1a", "step_2", "step_3", "step_4"];
        let store = metadata(dir.path(), &steps);
        let report = Pipeline::check(&config(&steps), &builtin("development").unwrap(), &store);
        assert_eq!(report.len(), 1, "{report}");
        assert!(report.pipeline_errors[0].contains("position 1"));
    }
}

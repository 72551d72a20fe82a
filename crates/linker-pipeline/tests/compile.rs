//! Load real YAML files from disk and compile them into a plan and rule file.

use linker_pipeline::{
    copy_source_files, prepare_results_directory, Config, Pipeline, RuleFile, YamlMetadataStore,
};
use linker_schema::{builtin, RESULT_FILE};
use linker_types::LinkerError;

const STEPS: [&str; 5] = ["step_1a", "step_1b", "step_2", "step_3", "step_4"];

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(order: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        for name in ["file1.csv", "file2.csv"] {
            std::fs::write(root.join(name), "foo,bar,counter\n1,2,0\n").unwrap();
        }
        std::fs::write(
            root.join("input_data.yaml"),
            format!(
                "foo: {}\nbar: {}\n",
                root.join("file1.csv").display(),
                root.join("file2.csv").display()
            ),
        )
        .unwrap();

        let mut pipeline = String::from("steps:\n");
        let mut metadata = String::new();
        for step in order {
            pipeline.push_str(&format!(
                "  {step}:\n    implementation:\n      name: {step}_python_pandas\n      configuration:\n        DUMMY_CONTAINER_INCREMENT: 1\n"
            ));
        }
        for step in STEPS {
            metadata.push_str(&format!(
                "{step}_python_pandas:\n  step: {step}\n  image_path: {}/python_pandas\n  script_cmd: python /dummy_step.py\n",
                root.display()
            ));
        }
        std::fs::write(root.join("pipeline.yaml"), pipeline).unwrap();
        std::fs::write(root.join("implementation_metadata.yaml"), metadata).unwrap();
        std::fs::write(root.join("python_pandas.tar.gz"), b"archive").unwrap();
        std::fs::write(
            root.join("environment.yaml"),
            "computing_environment: local\ncontainer_engine: docker\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self) -> Config {
        Config::load(
            &self.path("pipeline.yaml"),
            &self.path("input_data.yaml"),
            Some(&self.path("environment.yaml")),
        )
        .unwrap()
    }

    fn store(&self) -> YamlMetadataStore {
        YamlMetadataStore::load(&self.path("implementation_metadata.yaml")).unwrap()
    }
}

#[test]
fn development_schema_compiles_to_five_step_plan() {
    let fx = Fixture::new(&STEPS);
    let config = fx.config();
    let pipeline = Pipeline::new(config, &builtin("development").unwrap(), &fx.store()).unwrap();

    let results = prepare_results_directory(&fx.path("results"), false).unwrap();
    copy_source_files(&pipeline.config.source_files, &results).unwrap();
    assert!(results.join("environment.yaml").is_file());

    let plan = pipeline.plan(&results).unwrap();
    let ids: Vec<_> = plan.steps().iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec!["1_step_1a", "2_step_1b", "3_step_2", "4_step_3", "5_step_4"]);
    assert_eq!(plan.steps()[0].input_files.len(), 2);
    assert_eq!(
        plan.steps()[3].input_files,
        vec![results.join("intermediate/3_step_2").join(RESULT_FILE)]
    );

    let rule_file = RuleFile::new(&plan, &pipeline.config.environment).write().unwrap();
    let text = std::fs::read_to_string(rule_file).unwrap();
    // One final validation rule, then a validation and an implementation rule per step.
    assert_eq!(text.matches("    name: \"").count(), 11);
    assert_eq!(text.matches("Running ").count(), 5);
}

#[test]
fn swapped_steps_abort_with_report() {
    let fx = Fixture::new(&["step_1b", "step_1a", "step_2", "step_3", "step_4"]);
    let err = Pipeline::new(fx.config(), &builtin("development").unwrap(), &fx.store()).unwrap_err();
    assert!(err.is_pre_execution());
    let LinkerError::Validation(report) = err else {
        panic!("expected a validation report");
    };
    assert_eq!(report.pipeline_errors.len(), 1);
    let yaml = report.to_yaml().unwrap();
    assert!(yaml.contains("PIPELINE ERRORS"));
}

#[test]
fn missing_input_data_is_a_config_error() {
    let fx = Fixture::new(&STEPS);
    std::fs::remove_file(fx.path("file2.csv")).unwrap();
    let err = Config::load(
        &fx.path("pipeline.yaml"),
        &fx.path("input_data.yaml"),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LinkerError::Config(_)));
    assert!(err.to_string().contains("file2.csv"));
}

//! CLI binary for validating, planning and running linker pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use linker_orchestrator::{
    BatchScheduler, ClusterProvisioner, CommandExecutor, EngineSelector, LocalCommandExecutor,
    PlanRunner, RunSession, SlurmScheduler,
};
use linker_pipeline::{
    copy_source_files, prepare_results_directory, Config, EnvironmentSpec, Pipeline, RuleFile,
    YamlMetadataStore,
};
use linker_schema::builtin;
use linker_types::{LinkerError, ValidationReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linker", version, about = "Compile and run containerized record-linkage pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// The three specification files plus the schema and metadata they are checked against.
#[derive(Args, Debug, Clone)]
struct CompileArgs {
    /// Pipeline specification (ordered step -> implementation bindings)
    #[arg(short, long)]
    pipeline: PathBuf,

    /// Input data specification (label -> file path)
    #[arg(short, long)]
    input_data: PathBuf,

    /// Computing environment specification (default: local, undefined engine)
    #[arg(short, long)]
    environment: Option<PathBuf>,

    /// Name of the built-in schema to compile against
    #[arg(long, default_value = "development")]
    schema: String,

    /// Implementation metadata registry
    #[arg(long, default_value = "implementation_metadata.yaml")]
    metadata: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, plan and run a pipeline
    Run {
        #[command(flatten)]
        compile: CompileArgs,

        /// Results root directory
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Write results directly into the output directory instead of a timestamped subdirectory
        #[arg(long)]
        no_timestamp: bool,

        /// Only write the rule file; do not run any step
        #[arg(long)]
        rules_only: bool,
    },

    /// Check a pipeline and print every problem found
    Validate {
        #[command(flatten)]
        compile: CompileArgs,
    },

    /// Show the execution plan without running it
    Plan {
        #[command(flatten)]
        compile: CompileArgs,

        /// Results root directory the plan is laid out under
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
    },

    /// Provision a Spark cluster on Slurm, print its address and leave it running
    BuildCluster {
        /// Computing environment specification with slurm and spark sections
        #[arg(short, long)]
        environment: PathBuf,

        /// Directory for the launch script and cluster logs
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Commands::Run {
            compile,
            output,
            no_timestamp,
            rules_only,
        } => cmd_run(&compile, &output, !no_timestamp, rules_only).await,
        Commands::Validate { compile } => cmd_validate(&compile),
        Commands::Plan { compile, output } => cmd_plan(&compile, &output),
        Commands::BuildCluster {
            environment,
            output,
        } => cmd_build_cluster(&environment, &output).await,
    };

    // A failed validation is a structured report, not a backtrace.
    if let Err(err) = &outcome {
        if let Some(LinkerError::Validation(report)) = err.downcast_ref::<LinkerError>() {
            print_report(report)?;
            std::process::exit(1);
        }
    }
    outcome
}

fn print_report(report: &ValidationReport) -> anyhow::Result<()> {
    eprintln!("Pipeline validation failed with {} error(s):", report.len());
    print!("{}", report.to_yaml()?);
    Ok(())
}

fn load_config(args: &CompileArgs) -> anyhow::Result<Config> {
    Ok(Config::load(
        &args.pipeline,
        &args.input_data,
        args.environment.as_deref(),
    )?)
}

fn compile(args: &CompileArgs) -> anyhow::Result<Pipeline> {
    let config = load_config(args)?;
    let schema = builtin(&args.schema)?;
    let store = YamlMetadataStore::load(&args.metadata)?;
    Ok(Pipeline::new(config, &schema, &store)?)
}

fn cmd_validate(args: &CompileArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let schema = builtin(&args.schema)?;
    let store = YamlMetadataStore::load(&args.metadata)?;
    let report = Pipeline::check(&config, &schema, &store);

    if report.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }
    print_report(&report)?;
    std::process::exit(1);
}

fn cmd_plan(args: &CompileArgs, output: &Path) -> anyhow::Result<()> {
    let pipeline = compile(args)?;
    let plan = pipeline.plan(output)?;

    println!("Schema: {}", args.schema);
    println!("Steps: {}", plan.len());
    for step in plan.steps() {
        println!("\n{} ({})", step.step_id, step.implementation.name);
        for input in &step.input_files {
            println!("  input:       {}", input.display());
        }
        println!("  output:      {}", step.result_file().display());
        println!("  diagnostics: {}", step.diagnostics_dir.display());
        if step.implementation.requires_cluster() {
            println!("  cluster:     requested");
        }
    }
    Ok(())
}

/// Scheduler session for Slurm environments; local runs have none.
fn scheduler_for(
    env: &EnvironmentSpec,
    executor: &Arc<dyn CommandExecutor>,
) -> Option<Arc<dyn BatchScheduler>> {
    env.is_slurm()
        .then(|| Arc::new(SlurmScheduler::new(executor.clone())) as Arc<dyn BatchScheduler>)
}

/// Cancel the session's token on Ctrl-C so the run unwinds through `close`.
fn cancel_on_ctrl_c(session: &RunSession) {
    let token = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting run");
            token.cancel();
        }
    });
}

async fn cmd_run(
    args: &CompileArgs,
    output: &Path,
    timestamp: bool,
    rules_only: bool,
) -> anyhow::Result<()> {
    let pipeline = compile(args)?;
    let results_dir = prepare_results_directory(output, timestamp)?;
    copy_source_files(&pipeline.config.source_files, &results_dir)?;
    let plan = pipeline.plan(&results_dir)?;

    let env = &pipeline.config.environment;
    let rule_file = RuleFile::new(&plan, env).write()?;
    println!("Results: {}", results_dir.display());
    println!("Rule file: {}", rule_file.display());
    if rules_only {
        return Ok(());
    }

    let executor: Arc<dyn CommandExecutor> = Arc::new(LocalCommandExecutor::new());
    let scheduler = scheduler_for(env, &executor);
    let mut runner = PlanRunner::new(EngineSelector::from_environment(env, executor.clone()));
    if let Some(provisioner) = scheduler
        .as_ref()
        .and_then(|s| ClusterProvisioner::from_environment(env, s.clone()))
    {
        runner = runner.with_provisioner(provisioner);
    }

    let session = RunSession::new(scheduler);
    cancel_on_ctrl_c(&session);
    let summary = runner.run(&plan, &session).await?;

    println!("\nPipeline completed (run {})", summary.run_id);
    for step in &summary.steps {
        match &step.cluster_address {
            Some(address) => println!("  {} [{}] cluster={}", step.step_id, step.engine, address),
            None => println!("  {} [{}]", step.step_id, step.engine),
        }
    }
    println!("Final result: {}", summary.final_result.display());
    Ok(())
}

async fn cmd_build_cluster(environment: &Path, output: &Path) -> anyhow::Result<()> {
    let env = EnvironmentSpec::load(environment)?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(LocalCommandExecutor::new());
    let Some(scheduler) = scheduler_for(&env, &executor) else {
        anyhow::bail!("build-cluster requires computing_environment: slurm");
    };
    let Some(provisioner) = ClusterProvisioner::from_environment(&env, scheduler.clone()) else {
        anyhow::bail!("build-cluster requires a 'spark' section in the computing environment");
    };
    let provisioner = provisioner.keep_alive();
    std::fs::create_dir_all(output)?;
    let work_dir = std::fs::canonicalize(output)?;

    let session = RunSession::new(Some(scheduler));
    cancel_on_ctrl_c(&session);
    let handle = session
        .scope(provisioner.provision("spark_cluster", &[], &work_dir, &session.cancel_token()))
        .await?;

    println!("Spark master URL: {}", handle.address);
    println!("Job id: {}", handle.job_id);
    provisioner.release(handle);
    Ok(())
}

//! Container engines and the Docker → Singularity fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use linker_pipeline::{ContainerEngineKind, EnvironmentSpec, ExecutionStep};
use linker_types::{LinkerError, Result};

use uuid::Uuid;

use crate::exec::{CommandExecutor, CommandOutput};

// ---------------------------------------------------------------------------
// ContainerRun
// ---------------------------------------------------------------------------

/// Everything an engine needs to run one step's implementation.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    pub step_id: String,
    pub implementation: String,
    /// Unique per run so a cancelled container can be found and killed.
    pub container_name: String,
    pub docker_archive: PathBuf,
    pub singularity_image: PathBuf,
    pub script_cmd: String,
    pub env: IndexMap<String, String>,
    /// Host directories mounted at the same path inside the container.
    pub bind_paths: Vec<PathBuf>,
    pub log_file: PathBuf,
}

impl ContainerRun {
    pub fn for_step(step: &ExecutionStep) -> Result<Self> {
        let implementation = &step.implementation;
        Ok(Self {
            step_id: step.step_id.clone(),
            implementation: implementation.name.clone(),
            container_name: format!("linker-{}-{}", step.step_id, Uuid::new_v4().simple()),
            docker_archive: implementation.docker_archive(),
            singularity_image: implementation.singularity_image(),
            script_cmd: implementation.metadata.script_cmd.clone(),
            env: step.environment()?,
            bind_paths: step.bind_paths(),
            log_file: step
                .diagnostics_dir
                .join(format!("{}-output.log", implementation.name)),
        })
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

/// Runs a [`ContainerRun`] to completion. Engine failures are reported as
/// [`LinkerError::ContainerEngine`] so a caller can fall back to another engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, run: &ContainerRun) -> Result<()>;

    /// Stop a container whose `run` future was abandoned. Engines whose
    /// container dies with the client process need do nothing.
    async fn stop(&self, _run: &ContainerRun) -> Result<()> {
        Ok(())
    }
}

fn engine_error(engine: &str, message: impl Into<String>) -> LinkerError {
    LinkerError::ContainerEngine {
        engine: engine.to_string(),
        message: message.into(),
    }
}

fn to_args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

async fn invoke(
    executor: &dyn CommandExecutor,
    engine: &str,
    args: Vec<String>,
    env: &[(String, String)],
) -> Result<CommandOutput> {
    executor
        .run(engine, &args, env)
        .await
        .map_err(|e| engine_error(engine, format!("could not run '{engine}': {e}")))
}

fn check(engine: &str, what: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(engine_error(
            engine,
            format!("{what} failed: {}", output.failure_message()),
        ))
    }
}

/// Append the container's output to the step's log file.
async fn write_log(engine: &str, run: &ContainerRun, output: &CommandOutput) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&run.log_file)
        .await
        .map_err(|e| engine_error(engine, format!("cannot open {}: {e}", run.log_file.display())))?;
    let text = format!(
        "=== {engine} (exit {}) ===\n{}{}",
        output.exit_code, output.stdout, output.stderr
    );
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| engine_error(engine, format!("cannot write {}: {e}", run.log_file.display())))
}

// ---------------------------------------------------------------------------
// Docker
// ---------------------------------------------------------------------------

/// Extract the image reference from `docker load` output
/// (`Loaded image: name:tag` or `Loaded image ID: sha256:...`).
pub fn parse_loaded_image(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .filter(|line| line.trim_start().starts_with("Loaded image"))
        .find_map(|line| line.split_once(": "))
        .map(|(_, image)| image.trim().to_string())
        .filter(|image| !image.is_empty())
}

pub struct DockerEngine {
    executor: Arc<dyn CommandExecutor>,
}

impl DockerEngine {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn run_args(run: &ContainerRun, image: &str) -> Vec<String> {
        let mut args = to_args(&["run", "--rm", "--name", run.container_name.as_str()]);
        for path in &run.bind_paths {
            args.push("-v".into());
            args.push(format!("{0}:{0}", path.display()));
        }
        for (key, value) in &run.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.extend([image.to_string(), "bash".into(), "-c".into(), run.script_cmd.clone()]);
        args
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, run: &ContainerRun) -> Result<()> {
        let engine = self.name();
        let exec = self.executor.as_ref();

        tracing::info!(step_id = %run.step_id, archive = %run.docker_archive.display(), "loading docker image");
        let loaded = invoke(
            exec,
            engine,
            vec!["load".into(), "-i".into(), display(&run.docker_archive)],
            &[],
        )
        .await?;
        let loaded = check(engine, "docker load", loaded)?;
        let image = parse_loaded_image(&loaded.stdout)
            .ok_or_else(|| engine_error(engine, "could not determine the loaded image"))?;

        tracing::info!(step_id = %run.step_id, image = %image, "running docker container");
        let output = invoke(exec, engine, Self::run_args(run, &image), &[]).await?;
        write_log(engine, run, &output).await?;
        let result = check(engine, "docker run", output).map(|_| ());

        match invoke(exec, engine, vec!["rmi".into(), image.clone()], &[]).await {
            Ok(out) if out.success() => tracing::debug!(image = %image, "removed docker image"),
            Ok(out) => tracing::warn!(image = %image, error = %out.failure_message(), "failed to remove docker image"),
            Err(e) => tracing::warn!(image = %image, error = %e, "failed to remove docker image"),
        }
        result
    }

    /// Killing the `docker run` client leaves the container running, so kill
    /// it by name.
    async fn stop(&self, run: &ContainerRun) -> Result<()> {
        let engine = self.name();
        let output = invoke(
            self.executor.as_ref(),
            engine,
            vec!["kill".into(), run.container_name.clone()],
            &[],
        )
        .await?;
        check(engine, "docker kill", output)?;
        tracing::info!(step_id = %run.step_id, container = %run.container_name, "killed docker container");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Singularity
// ---------------------------------------------------------------------------

pub struct SingularityEngine {
    executor: Arc<dyn CommandExecutor>,
}

impl SingularityEngine {
    pub const ENV_PREFIX: &'static str = "SINGULARITYENV_";

    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn exec_args(run: &ContainerRun) -> Vec<String> {
        let mut args = to_args(&["exec", "--no-home", "--containall"]);
        if !run.bind_paths.is_empty() {
            let binds: Vec<String> = run.bind_paths.iter().map(|p| display(p)).collect();
            args.push("-B".into());
            args.push(binds.join(","));
        }
        args.extend([
            display(&run.singularity_image),
            "bash".into(),
            "-c".into(),
            run.script_cmd.clone(),
        ]);
        args
    }

    fn exec_env(run: &ContainerRun) -> Vec<(String, String)> {
        run.env
            .iter()
            .map(|(k, v)| (format!("{}{k}", Self::ENV_PREFIX), v.clone()))
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for SingularityEngine {
    fn name(&self) -> &'static str {
        "singularity"
    }

    async fn run(&self, run: &ContainerRun) -> Result<()> {
        let engine = self.name();
        let exec = self.executor.as_ref();

        if !run.singularity_image.exists() {
            tracing::info!(
                step_id = %run.step_id,
                image = %run.singularity_image.display(),
                "building singularity image from docker archive"
            );
            let built = invoke(
                exec,
                engine,
                vec![
                    "build".into(),
                    display(&run.singularity_image),
                    format!("docker-archive://{}", run.docker_archive.display()),
                ],
                &[],
            )
            .await?;
            check(engine, "singularity build", built)?;
        }

        tracing::info!(step_id = %run.step_id, image = %run.singularity_image.display(), "running singularity container");
        let output = invoke(exec, engine, Self::exec_args(run), &Self::exec_env(run)).await?;
        write_log(engine, run, &output).await?;
        let result = check(engine, "singularity exec", output).map(|_| ());

        match invoke(exec, engine, to_args(&["cache", "clean", "--force"]), &[]).await {
            Ok(out) if out.success() => tracing::debug!("cleaned singularity cache"),
            Ok(out) => tracing::warn!(error = %out.failure_message(), "failed to clean singularity cache"),
            Err(e) => tracing::warn!(error = %e, "failed to clean singularity cache"),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// EngineSelector
// ---------------------------------------------------------------------------

/// One engine tried for a step; `error` is set if it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAttempt {
    pub engine: &'static str,
    pub error: Option<String>,
}

/// The engine that ran a step and every attempt made on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub engine: &'static str,
    pub attempts: Vec<EngineAttempt>,
}

/// Picks the engine for each step according to the configured choice.
///
/// With [`ContainerEngineKind::Undefined`] on a local environment Docker runs
/// first and Singularity is tried once if Docker fails. On Slurm an undefined
/// choice means Singularity, since cluster nodes do not run a Docker daemon.
pub struct EngineSelector {
    kind: ContainerEngineKind,
    local: bool,
    docker: Arc<dyn ContainerEngine>,
    singularity: Arc<dyn ContainerEngine>,
}

impl EngineSelector {
    pub fn new(
        kind: ContainerEngineKind,
        local: bool,
        docker: Arc<dyn ContainerEngine>,
        singularity: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            kind,
            local,
            docker,
            singularity,
        }
    }

    /// The real Docker and Singularity engines behind `executor`.
    pub fn from_environment(env: &EnvironmentSpec, executor: Arc<dyn CommandExecutor>) -> Self {
        Self::new(
            env.container_engine,
            !env.is_slurm(),
            Arc::new(DockerEngine::new(executor.clone())),
            Arc::new(SingularityEngine::new(executor)),
        )
    }

    /// Run `run` and report which engine succeeded, with the attempts made.
    pub async fn run(&self, run: &ContainerRun) -> Result<EngineReport> {
        let mut attempts = Vec::new();
        let engine = match self.kind {
            ContainerEngineKind::Docker => self.attempt(&self.docker, run, &mut attempts).await?,
            ContainerEngineKind::Singularity => {
                self.attempt(&self.singularity, run, &mut attempts).await?
            }
            ContainerEngineKind::Undefined if !self.local => {
                self.attempt(&self.singularity, run, &mut attempts).await?
            }
            ContainerEngineKind::Undefined => {
                let docker = self.attempt(&self.docker, run, &mut attempts).await;
                let docker_err = match docker {
                    Ok(name) => return Ok(EngineReport { engine: name, attempts }),
                    Err(e) if e.is_recoverable() => e,
                    Err(e) => return Err(e),
                };
                tracing::warn!(
                    step_id = %run.step_id,
                    error = %docker_err,
                    "docker failed, falling back to singularity"
                );
                let singularity = self.attempt(&self.singularity, run, &mut attempts).await;
                match singularity {
                    Ok(name) => name,
                    Err(singularity_err) => {
                        return Err(LinkerError::ContainerEnginesExhausted {
                            step: run.step_id.clone(),
                            docker: docker_err.to_string(),
                            singularity: singularity_err.to_string(),
                        })
                    }
                }
            }
        };
        Ok(EngineReport { engine, attempts })
    }

    /// Stop whatever engine may still be running `run` after its future was
    /// dropped. Failures are logged, not returned.
    pub async fn stop(&self, run: &ContainerRun) {
        let engines = match self.kind {
            ContainerEngineKind::Docker => vec![&self.docker],
            ContainerEngineKind::Singularity => vec![&self.singularity],
            ContainerEngineKind::Undefined if !self.local => vec![&self.singularity],
            ContainerEngineKind::Undefined => vec![&self.docker, &self.singularity],
        };
        for engine in engines {
            if let Err(e) = engine.stop(run).await {
                tracing::warn!(step_id = %run.step_id, engine = engine.name(), error = %e, "failed to stop container");
            }
        }
    }

    async fn attempt(
        &self,
        engine: &Arc<dyn ContainerEngine>,
        run: &ContainerRun,
        attempts: &mut Vec<EngineAttempt>,
    ) -> Result<&'static str> {
        tracing::info!(step_id = %run.step_id, engine = engine.name(), "starting container");
        match engine.run(run).await {
            Ok(()) => {
                tracing::info!(step_id = %run.step_id, engine = engine.name(), "container finished");
                attempts.push(EngineAttempt {
                    engine: engine.name(),
                    error: None,
                });
                Ok(engine.name())
            }
            Err(e) => {
                tracing::error!(step_id = %run.step_id, engine = engine.name(), error = %e, "container failed");
                attempts.push(EngineAttempt {
                    engine: engine.name(),
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every invocation and answers from a script keyed on the first argument.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<(String, Vec<String>, Vec<(String, String)>)>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            env: &[(String, String)],
        ) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), env.to_vec()));
            let sub = args.first().map(String::as_str).unwrap_or_default();
            if Some(sub) == self.fail_on {
                return Ok(CommandOutput {
                    stderr: format!("{sub} exploded"),
                    exit_code: 1,
                    ..Default::default()
                });
            }
            let stdout = if sub == "load" {
                "Loaded image: python_pandas:latest\n".to_string()
            } else {
                "ok\n".to_string()
            };
            Ok(CommandOutput {
                stdout,
                ..Default::default()
            })
        }
    }

    fn container_run(dir: &Path) -> ContainerRun {
        let mut env = IndexMap::new();
        env.insert("DUMMY_CONTAINER_INCREMENT".to_string(), "2".to_string());
        ContainerRun {
            step_id: "1_step_1".into(),
            implementation: "step_1_python_pandas".into(),
            container_name: "linker-1_step_1-test".into(),
            docker_archive: dir.join("python_pandas.tar.gz"),
            singularity_image: dir.join("python_pandas.sif"),
            script_cmd: "python /dummy_step.py".into(),
            env,
            bind_paths: vec![dir.join("in"), dir.join("out")],
            log_file: dir.join("step_1_python_pandas-output.log"),
        }
    }

    #[test]
    fn parses_docker_load_output() {
        assert_eq!(
            parse_loaded_image("Loaded image: python_pandas:latest\n").as_deref(),
            Some("python_pandas:latest")
        );
        assert_eq!(
            parse_loaded_image("noise\nLoaded image ID: sha256:abc123\n").as_deref(),
            Some("sha256:abc123")
        );
        assert_eq!(parse_loaded_image("nothing here"), None);
    }

    #[tokio::test]
    async fn docker_loads_runs_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        let run = container_run(dir.path());
        DockerEngine::new(exec.clone()).run(&run).await.unwrap();

        let calls = exec.calls.lock().unwrap();
        let subcommands: Vec<&str> = calls.iter().map(|c| c.1[0].as_str()).collect();
        assert_eq!(subcommands, vec!["load", "run", "rmi"]);
        let run_args = &calls[1].1;
        let bind = format!("{0}:{0}", dir.path().join("in").display());
        assert!(run_args.contains(&bind));
        assert!(run_args.contains(&"DUMMY_CONTAINER_INCREMENT=2".to_string()));
        assert!(run_args.contains(&"python_pandas:latest".to_string()));
        assert_eq!(&run_args[..4], &["run", "--rm", "--name", "linker-1_step_1-test"]);
        assert_eq!(calls[2].1[1], "python_pandas:latest");

        let log = std::fs::read_to_string(&run.log_file).unwrap();
        assert!(log.contains("=== docker (exit 0) ==="));
    }

    #[tokio::test]
    async fn docker_run_failure_still_removes_image() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor {
            fail_on: Some("run"),
            ..Default::default()
        });
        let err = DockerEngine::new(exec.clone())
            .run(&container_run(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("run exploded"));
        assert_eq!(exec.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn docker_stop_kills_the_named_container() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        DockerEngine::new(exec.clone())
            .stop(&container_run(dir.path()))
            .await
            .unwrap();
        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "docker");
        assert_eq!(calls[0].1, vec!["kill", "linker-1_step_1-test"]);
    }

    #[tokio::test]
    async fn singularity_stop_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        SingularityEngine::new(exec.clone())
            .stop(&container_run(dir.path()))
            .await
            .unwrap();
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn singularity_builds_missing_image_and_prefixes_env() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        let run = container_run(dir.path());
        SingularityEngine::new(exec.clone()).run(&run).await.unwrap();

        let calls = exec.calls.lock().unwrap();
        let subcommands: Vec<&str> = calls.iter().map(|c| c.1[0].as_str()).collect();
        assert_eq!(subcommands, vec!["build", "exec", "cache"]);
        assert_eq!(
            calls[0].1[2],
            format!("docker-archive://{}", run.docker_archive.display())
        );
        assert!(calls[1].1.contains(&"--containall".to_string()));
        assert!(calls[1]
            .2
            .contains(&("SINGULARITYENV_DUMMY_CONTAINER_INCREMENT".into(), "2".into())));
    }

    #[tokio::test]
    async fn singularity_reuses_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        let run = container_run(dir.path());
        std::fs::write(&run.singularity_image, b"sif").unwrap();
        SingularityEngine::new(exec.clone()).run(&run).await.unwrap();
        assert_eq!(exec.calls.lock().unwrap()[0].1[0], "exec");
    }

    struct FakeEngine {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
        stops: AtomicUsize,
    }

    impl FakeEngine {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _run: &ContainerRun) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(engine_error(self.name, "daemon unavailable"))
            } else {
                Ok(())
            }
        }

        async fn stop(&self, _run: &ContainerRun) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn undefined_falls_back_once() {
        let dir = tempfile::tempdir().unwrap();
        let docker = FakeEngine::new("docker", true);
        let singularity = FakeEngine::new("singularity", false);
        let selector = EngineSelector::new(
            ContainerEngineKind::Undefined,
            true,
            docker.clone(),
            singularity.clone(),
        );
        let report = selector.run(&container_run(dir.path())).await.unwrap();
        assert_eq!(report.engine, "singularity");
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].engine, "docker");
        assert!(report.attempts[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("daemon unavailable")));
        assert_eq!(
            report.attempts[1],
            EngineAttempt {
                engine: "singularity",
                error: None
            }
        );
        assert_eq!(docker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(singularity.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_reaches_only_engines_that_may_be_running() {
        let dir = tempfile::tempdir().unwrap();
        let run = container_run(dir.path());

        let docker = FakeEngine::new("docker", false);
        let singularity = FakeEngine::new("singularity", false);
        EngineSelector::new(ContainerEngineKind::Undefined, true, docker.clone(), singularity.clone())
            .stop(&run)
            .await;
        assert_eq!(docker.stops.load(Ordering::SeqCst), 1);
        assert_eq!(singularity.stops.load(Ordering::SeqCst), 1);

        let docker = FakeEngine::new("docker", false);
        let singularity = FakeEngine::new("singularity", false);
        EngineSelector::new(ContainerEngineKind::Undefined, false, docker.clone(), singularity.clone())
            .stop(&run)
            .await;
        assert_eq!(docker.stops.load(Ordering::SeqCst), 0);
        assert_eq!(singularity.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_engines_failing_reports_both() {
        let dir = tempfile::tempdir().unwrap();
        let selector = EngineSelector::new(
            ContainerEngineKind::Undefined,
            true,
            FakeEngine::new("docker", true),
            FakeEngine::new("singularity", true),
        );
        let err = selector.run(&container_run(dir.path())).await.unwrap_err();
        let LinkerError::ContainerEnginesExhausted {
            step,
            docker,
            singularity,
        } = err
        else {
            panic!("expected exhausted engines, got {err:?}");
        };
        assert_eq!(step, "1_step_1");
        assert!(docker.contains("docker"));
        assert!(singularity.contains("singularity"));
    }

    #[tokio::test]
    async fn explicit_engine_never_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let singularity = FakeEngine::new("singularity", false);
        let selector = EngineSelector::new(
            ContainerEngineKind::Docker,
            true,
            FakeEngine::new("docker", true),
            singularity.clone(),
        );
        let err = selector.run(&container_run(dir.path())).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(singularity.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undefined_on_slurm_uses_singularity() {
        let dir = tempfile::tempdir().unwrap();
        let docker = FakeEngine::new("docker", false);
        let selector = EngineSelector::new(
            ContainerEngineKind::Undefined,
            false,
            docker.clone(),
            FakeEngine::new("singularity", false),
        );
        let report = selector.run(&container_run(dir.path())).await.unwrap();
        assert_eq!(report.engine, "singularity");
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(docker.calls.load(Ordering::SeqCst), 0);
    }
}

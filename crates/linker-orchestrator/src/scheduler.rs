//! Batch-scheduler session used to provision clusters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use linker_pipeline::{SlurmSettings, SparkSettings};
use linker_types::{LinkerError, Result};

use crate::exec::CommandExecutor;

/// An array job: task 1 is the cluster master, the remaining tasks are workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayJob {
    /// Step the job is provisioned for; used in errors and logs.
    pub step: String,
    pub name: String,
    pub script: PathBuf,
    pub tasks: u32,
    pub account: String,
    pub partition: String,
    pub mem_per_cpu_gb: u32,
    pub time_limit_hours: u32,
    pub cpus_per_task: u32,
    pub log_dir: PathBuf,
}

impl ArrayJob {
    /// One master plus `num_workers` workers sized from the Spark settings.
    pub fn cluster(
        step: &str,
        script: &Path,
        log_dir: &Path,
        slurm: &SlurmSettings,
        spark: &SparkSettings,
    ) -> Self {
        Self {
            step: step.to_string(),
            name: format!("spark_cluster_{step}"),
            script: script.to_path_buf(),
            tasks: spark.workers.num_workers + 1,
            account: slurm.account.clone(),
            partition: slurm.partition.clone(),
            mem_per_cpu_gb: spark.workers.mem_per_cpu,
            time_limit_hours: spark.workers.time_limit,
            cpus_per_task: spark.workers.cpus_per_task,
            log_dir: log_dir.to_path_buf(),
        }
    }
}

/// One scheduler session per run. `close` is called exactly once, at run end.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Submit `job` and return its job id.
    async fn submit(&self, job: &ArrayJob) -> Result<String>;

    /// Log file the master task writes once the job starts.
    fn master_log(&self, job: &ArrayJob, job_id: &str) -> PathBuf;

    async fn terminate(&self, job_id: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Talks to Slurm through `sbatch` and `scancel`.
pub struct SlurmScheduler {
    executor: Arc<dyn CommandExecutor>,
    closed: AtomicBool,
}

impl SlurmScheduler {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            closed: AtomicBool::new(false),
        }
    }

    pub fn sbatch_args(job: &ArrayJob) -> Vec<String> {
        vec![
            "--parsable".into(),
            format!("--job-name={}", job.name),
            format!("--array=1-{}", job.tasks),
            format!("--account={}", job.account),
            format!("--partition={}", job.partition),
            format!("--mem-per-cpu={}", job.mem_per_cpu_gb * 1024),
            format!("--time={}:00:00", job.time_limit_hours),
            format!("--cpus-per-task={}", job.cpus_per_task),
            format!("--output={}", job.log_dir.join("cluster_%A_%a.log").display()),
            job.script.display().to_string(),
        ]
    }

    fn ensure_open(&self, step: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkerError::ClusterProvisioning {
                step: step.to_string(),
                message: "the scheduler session is closed".into(),
            });
        }
        Ok(())
    }
}

/// `sbatch --parsable` prints `jobid` or `jobid;cluster`.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let id = stdout.trim().split(';').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[async_trait]
impl BatchScheduler for SlurmScheduler {
    async fn submit(&self, job: &ArrayJob) -> Result<String> {
        self.ensure_open(&job.step)?;
        let failed = |message: String| LinkerError::ClusterProvisioning {
            step: job.step.clone(),
            message,
        };

        let output = self
            .executor
            .run("sbatch", &Self::sbatch_args(job), &[])
            .await
            .map_err(|e| failed(format!("could not run sbatch: {e}")))?;
        if !output.success() {
            return Err(failed(format!("sbatch failed: {}", output.failure_message())));
        }
        let job_id = parse_job_id(&output.stdout)
            .ok_or_else(|| failed(format!("unexpected sbatch output '{}'", output.stdout.trim())))?;

        tracing::info!(
            step = %job.step,
            job_id = %job_id,
            tasks = job.tasks,
            log = %self.master_log(job, &job_id).display(),
            "submitted cluster job"
        );
        Ok(job_id)
    }

    fn master_log(&self, job: &ArrayJob, job_id: &str) -> PathBuf {
        job.log_dir.join(format!("cluster_{job_id}_1.log"))
    }

    async fn terminate(&self, job_id: &str) -> Result<()> {
        let output = self
            .executor
            .run("scancel", &[job_id.to_string()], &[])
            .await?;
        if !output.success() {
            return Err(LinkerError::Other(format!(
                "scancel {job_id} failed: {}",
                output.failure_message()
            )));
        }
        tracing::info!(job_id, "cancelled cluster job");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler session closed more than once");
        } else {
            tracing::debug!("scheduler session closed");
        }
        Ok(())
    }
}

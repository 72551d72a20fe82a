//! Per-step Spark cluster provisioning on a batch scheduler.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use linker_pipeline::{EnvironmentSpec, SlurmSettings, SparkSettings};
use linker_types::{LinkerError, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::{discover_address, PollPolicy, Sleeper, TokioSleeper, MASTER_MARKER};
use crate::scheduler::{ArrayJob, BatchScheduler};

pub const MASTER_PORT: u16 = 28508;
pub const MASTER_WEBUI_PORT: u16 = 28509;
pub const LAUNCH_SCRIPT_NAME: &str = "spark_cluster_launcher.sh";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    NotStarted,
    Submitted,
    PollingForAddress,
    Ready,
    InUse,
    Terminating,
    Terminated,
    Failed,
}

impl ClusterState {
    fn can_become(self, next: ClusterState) -> bool {
        use ClusterState::*;
        matches!(
            (self, next),
            (NotStarted, Submitted)
                | (NotStarted, Failed)
                | (Submitted, PollingForAddress)
                | (Submitted, Failed)
                | (PollingForAddress, Ready)
                | (PollingForAddress, Failed)
                | (Ready, InUse)
                | (Ready, Terminating)
                | (InUse, Terminating)
                | (Terminating, Terminated)
                | (Terminating, Failed)
        )
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::NotStarted => "not_started",
            ClusterState::Submitted => "submitted",
            ClusterState::PollingForAddress => "polling_for_address",
            ClusterState::Ready => "ready",
            ClusterState::InUse => "in_use",
            ClusterState::Terminating => "terminating",
            ClusterState::Terminated => "terminated",
            ClusterState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks one cluster's state and rejects out-of-order transitions.
#[derive(Debug, Clone)]
pub struct ClusterLifecycle {
    step: String,
    state: ClusterState,
}

impl ClusterLifecycle {
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            state: ClusterState::NotStarted,
        }
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn advance(&mut self, next: ClusterState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(LinkerError::Other(format!(
                "Cluster for step '{}' cannot go from {} to {}",
                self.step, self.state, next
            )));
        }
        tracing::info!(step = %self.step, from = %self.state, to = %next, "cluster state changed");
        self.state = next;
        Ok(())
    }
}

/// A provisioned cluster whose address is known.
#[derive(Debug)]
pub struct ClusterHandle {
    pub job_id: String,
    pub address: String,
    pub keep_alive: bool,
    lifecycle: ClusterLifecycle,
}

impl ClusterHandle {
    pub fn state(&self) -> ClusterState {
        self.lifecycle.state()
    }

    pub fn mark_in_use(&mut self) -> Result<()> {
        self.lifecycle.advance(ClusterState::InUse)
    }
}

// ---------------------------------------------------------------------------
// Launch script
// ---------------------------------------------------------------------------

/// Shell script run by every array task. Task 1 starts the master; the other
/// tasks wait for the master's announcement in its log and join as workers.
pub fn launch_script(image: &Path, bind_paths: &[PathBuf], log_dir: &Path) -> String {
    let mut binds = vec!["\"$SPARK_TMP\":/tmp".to_string()];
    binds.extend(bind_paths.iter().map(|p| format!("{0}:{0}", p.display())));
    let binds = binds.join(",");
    let master_log = log_dir.join("cluster_${SLURM_ARRAY_JOB_ID}_1.log");

    format!(
        r#"#!/bin/bash
# Spark cluster launcher generated by linker

unset SPARK_HOME
SINGULARITY_IMG="{image}"
SPARK_TMP="/tmp/spark_cluster_$USER"

export SPARK_ROOT=/opt/spark
export SPARK_WORKER_DIR="$SPARK_TMP/work"
export SPARK_LOCAL_DIRS="$SPARK_TMP/local"
export SPARK_MASTER_PORT={port}
export SPARK_MASTER_WEBUI_PORT={webui}
export SPARK_WORKER_CORES=$SLURM_CPUS_PER_TASK
export SPARK_DAEMON_MEMORY=$(( SLURM_MEM_PER_CPU * SLURM_CPUS_PER_TASK / 2 ))m
export SPARK_MEM=$SPARK_DAEMON_MEMORY

mkdir -p "$SPARK_TMP"
if [ "$SLURM_ARRAY_TASK_ID" -eq 1 ]; then
    singularity exec -B {binds} "$SINGULARITY_IMG" \
        "$SPARK_ROOT/bin/spark-class" org.apache.spark.deploy.master.Master \
        --host "$(hostname -f)" --port "$SPARK_MASTER_PORT" \
        --webui-port "$SPARK_MASTER_WEBUI_PORT"
else
    MASTER_LOG="{master_log}"
    until grep -q "{marker}" "$MASTER_LOG" 2>/dev/null; do
        sleep 5
    done
    MASTER_URL=$(grep "{marker}" "$MASTER_LOG" | tail -n 1 | awk '{{print $NF}}')
    singularity exec -B {binds} "$SINGULARITY_IMG" \
        "$SPARK_ROOT/bin/spark-class" org.apache.spark.deploy.worker.Worker "$MASTER_URL"
fi
"#,
        image = image.display(),
        port = MASTER_PORT,
        webui = MASTER_WEBUI_PORT,
        master_log = master_log.display(),
        marker = MASTER_MARKER,
    )
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Submits, discovers and releases clusters through a [`BatchScheduler`].
pub struct ClusterProvisioner {
    scheduler: Arc<dyn BatchScheduler>,
    sleeper: Arc<dyn Sleeper>,
    policy: PollPolicy,
    slurm: SlurmSettings,
    spark: SparkSettings,
}

impl ClusterProvisioner {
    pub fn new(scheduler: Arc<dyn BatchScheduler>, slurm: SlurmSettings, spark: SparkSettings) -> Self {
        Self {
            scheduler,
            sleeper: Arc::new(TokioSleeper),
            policy: PollPolicy::default(),
            slurm,
            spark,
        }
    }

    /// `None` unless the environment is Slurm with Spark configured.
    pub fn from_environment(env: &EnvironmentSpec, scheduler: Arc<dyn BatchScheduler>) -> Option<Self> {
        let spark = env.cluster_settings()?.clone();
        let slurm = env.slurm.clone()?;
        Some(Self::new(scheduler, slurm, spark))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Always keep provisioned clusters running, regardless of configuration.
    pub fn keep_alive(mut self) -> Self {
        self.spark.keep_alive = true;
        self
    }

    /// Submit a cluster for `step`, wait for its master address and return it
    /// in the `Ready` state. The launch script and cluster logs go to `work_dir`.
    pub async fn provision(
        &self,
        step: &str,
        bind_paths: &[PathBuf],
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle> {
        let mut lifecycle = ClusterLifecycle::new(step);
        let failed = |message: String| LinkerError::ClusterProvisioning {
            step: step.to_string(),
            message,
        };

        let Some(image) = self.spark.image_path.as_deref() else {
            lifecycle.advance(ClusterState::Failed)?;
            return Err(failed("spark.image_path is not configured".into()));
        };
        let script = work_dir.join(LAUNCH_SCRIPT_NAME);
        if let Err(e) = tokio::fs::create_dir_all(work_dir).await {
            lifecycle.advance(ClusterState::Failed)?;
            return Err(failed(format!("cannot create {}: {e}", work_dir.display())));
        }
        if let Err(e) = tokio::fs::write(&script, launch_script(image, bind_paths, work_dir)).await {
            lifecycle.advance(ClusterState::Failed)?;
            return Err(failed(format!("cannot write {}: {e}", script.display())));
        }

        let job = ArrayJob::cluster(step, &script, work_dir, &self.slurm, &self.spark);
        let job_id = match self.scheduler.submit(&job).await {
            Ok(id) => id,
            Err(e) => {
                lifecycle.advance(ClusterState::Failed)?;
                return Err(e);
            }
        };
        lifecycle.advance(ClusterState::Submitted)?;

        lifecycle.advance(ClusterState::PollingForAddress)?;
        let log = self.scheduler.master_log(&job, &job_id);
        let address = match discover_address(&log, step, &self.policy, self.sleeper.as_ref(), cancel).await {
            Ok(address) => address,
            Err(e) => {
                lifecycle.advance(ClusterState::Failed)?;
                // The job is useless without an address.
                if let Err(cancel_err) = self.scheduler.terminate(&job_id).await {
                    tracing::warn!(step, job_id = %job_id, error = %cancel_err, "failed to cancel undiscovered cluster");
                }
                return Err(e);
            }
        };
        lifecycle.advance(ClusterState::Ready)?;

        Ok(ClusterHandle {
            job_id,
            address,
            keep_alive: self.spark.keep_alive,
            lifecycle,
        })
    }

    /// Start tearing the cluster down unless it is kept alive. Returns the
    /// background termination task, which callers do not need to await.
    pub fn release(&self, handle: ClusterHandle) -> Option<JoinHandle<()>> {
        let ClusterHandle {
            job_id,
            address,
            keep_alive,
            mut lifecycle,
        } = handle;
        if keep_alive {
            tracing::info!(job_id = %job_id, address = %address, "keeping cluster alive");
            return None;
        }
        if let Err(e) = lifecycle.advance(ClusterState::Terminating) {
            tracing::warn!(job_id = %job_id, error = %e, "not terminating cluster");
            return None;
        }

        let scheduler = self.scheduler.clone();
        Some(tokio::spawn(async move {
            let next = match scheduler.terminate(&job_id).await {
                Ok(()) => ClusterState::Terminated,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "failed to terminate cluster");
                    ClusterState::Failed
                }
            };
            let _ = lifecycle.advance(next);
        }))
    }
}

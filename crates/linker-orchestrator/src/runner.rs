//! Sequential plan execution.
//!
//! Each step runs its full lifecycle before the next one starts: prepare
//! directories, validate input, optionally provision a cluster, run the
//! container, release the cluster and validate output.

use std::path::PathBuf;

use linker_pipeline::{ExecutionPlan, ExecutionStep, CLUSTER_ADDRESS_ENV};
use linker_schema::StepValidation;
use linker_types::{LinkerError, Result};
use uuid::Uuid;

use crate::cluster::{ClusterHandle, ClusterProvisioner};
use crate::container::{ContainerRun, EngineAttempt, EngineSelector};
use crate::session::RunSession;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step_id: String,
    pub engine: &'static str,
    /// Every engine tried, in order; the last one succeeded.
    pub attempts: Vec<EngineAttempt>,
    pub cluster_address: Option<String>,
    pub result_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub steps: Vec<StepOutcome>,
    pub final_result: PathBuf,
}

pub struct PlanRunner {
    engines: EngineSelector,
    provisioner: Option<ClusterProvisioner>,
}

// ---------------------------------------------------------------------------
// PlanRunner
// ---------------------------------------------------------------------------

impl PlanRunner {
    pub fn new(engines: EngineSelector) -> Self {
        Self {
            engines,
            provisioner: None,
        }
    }

    pub fn with_provisioner(mut self, provisioner: ClusterProvisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Run every step of `plan` in order and close `session` afterwards, on
    /// success and on failure alike. The first failing step aborts the run.
    pub async fn run(&self, plan: &ExecutionPlan, session: &RunSession) -> Result<RunSummary> {
        session.scope(self.run_steps(plan, session)).await
    }

    async fn run_steps(&self, plan: &ExecutionPlan, session: &RunSession) -> Result<RunSummary> {
        tracing::info!(run_id = %session.id(), steps = plan.len(), "starting pipeline run");
        let mut steps = Vec::with_capacity(plan.len());
        for step in plan.steps() {
            match self.run_step(step, session).await {
                Ok(outcome) => steps.push(outcome),
                Err(e) => {
                    tracing::error!(step_id = %step.step_id, error = %e, "step failed, aborting run");
                    return Err(e);
                }
            }
        }

        let final_result = plan.final_result();
        tracing::info!(
            run_id = %session.id(),
            result = %final_result.display(),
            "pipeline run complete"
        );
        Ok(RunSummary {
            run_id: session.id(),
            steps,
            final_result,
        })
    }

    async fn run_step(&self, step: &ExecutionStep, session: &RunSession) -> Result<StepOutcome> {
        let cancel = session.cancel_token();
        if cancel.is_cancelled() {
            return Err(LinkerError::Cancelled);
        }
        tracing::info!(
            step_id = %step.step_id,
            implementation = %step.implementation.name,
            "running step"
        );

        step.prepare_directories()?;
        let errors = step.node.validate_input(&step.input_files, &step.slot_inputs);
        if !errors.is_empty() {
            return Err(LinkerError::InputValidation {
                step_id: step.step_id.clone(),
                errors,
            });
        }

        let mut run = ContainerRun::for_step(step)?;
        let cluster = self.acquire_cluster(step, &run, session).await?;
        if let Some(handle) = &cluster {
            run = run.with_env(CLUSTER_ADDRESS_ENV, &handle.address);
        }
        let cluster_address = cluster.as_ref().map(|h| h.address.clone());

        let report = tokio::select! {
            result = self.engines.run(&run) => result,
            _ = cancel.cancelled() => Err(LinkerError::Cancelled),
        };
        if matches!(report, Err(LinkerError::Cancelled)) {
            self.engines.stop(&run).await;
        }
        // Released whether or not the container succeeded.
        if let (Some(handle), Some(provisioner)) = (cluster, &self.provisioner) {
            if let Some(task) = provisioner.release(handle) {
                session.track(task);
            }
        }
        let report = report?;

        step.node.validate_output(&step.step_id, &step.output_dir)?;
        tracing::info!(step_id = %step.step_id, engine = report.engine, "step complete");
        Ok(StepOutcome {
            step_id: step.step_id.clone(),
            engine: report.engine,
            attempts: report.attempts,
            cluster_address,
            result_file: step.result_file(),
        })
    }

    async fn acquire_cluster(
        &self,
        step: &ExecutionStep,
        run: &ContainerRun,
        session: &RunSession,
    ) -> Result<Option<ClusterHandle>> {
        if !step.implementation.requires_cluster() {
            return Ok(None);
        }
        let Some(provisioner) = &self.provisioner else {
            tracing::warn!(
                step_id = %step.step_id,
                "implementation requests a cluster but this environment does not provision one; \
                 the implementation is responsible for starting its own"
            );
            return Ok(None);
        };

        let mut handle = provisioner
            .provision(
                &step.step_id,
                &run.bind_paths,
                &step.diagnostics_dir,
                &session.cancel_token(),
            )
            .await?;
        handle.mark_in_use()?;
        Ok(Some(handle))
    }
}

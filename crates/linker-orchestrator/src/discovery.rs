//! Bounded polling of a cluster master's log for its service address.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use linker_types::{LinkerError, Result};
use tokio_util::sync::CancellationToken;

/// Line the Spark master prints once it is accepting workers.
pub const MASTER_MARKER: &str = "Starting Spark master at";

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

/// The address announced by the last marker line, if any.
pub fn parse_master_address(log: &str) -> Option<String> {
    log.lines()
        .rev()
        .filter(|line| line.contains(MASTER_MARKER))
        .find_map(|line| line.split_whitespace().last())
        .map(str::to_string)
}

/// Poll `log` until it announces the master address.
///
/// A missing log is expected while the scheduler starts the job. Gives up with
/// [`LinkerError::ClusterDiscoveryTimeout`] after `policy.max_attempts` reads and
/// returns [`LinkerError::Cancelled`] as soon as `cancel` fires.
pub async fn discover_address(
    log: &Path,
    step: &str,
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut slept = Duration::ZERO;
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(LinkerError::Cancelled);
        }

        match tokio::fs::read_to_string(log).await {
            Ok(contents) => {
                if let Some(address) = parse_master_address(&contents) {
                    tracing::info!(step, attempt, address = %address, "discovered cluster address");
                    return Ok(address);
                }
                tracing::debug!(step, attempt, "cluster log has no master address yet");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(step, attempt, log = %log.display(), "cluster log does not exist yet");
            }
            Err(e) => return Err(e.into()),
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LinkerError::Cancelled),
                _ = sleeper.sleep(policy.interval) => {}
            }
            slept += policy.interval;
        }
    }

    Err(LinkerError::ClusterDiscoveryTimeout {
        step: step.to_string(),
        attempts: policy.max_attempts,
        elapsed_secs: slept.as_secs(),
    })
}

//! Process-wide command broker.
//!
//! Every `vpncmd` invocation funnels through one FIFO queue drained by a
//! single worker task, so at most one management process runs at any
//! instant. Callers await a oneshot reply and never block each other's
//! own execution. Transient failures are retried inside the worker with
//! exponential backoff; a failed unit never stalls the queue.

use crate::softether::exec::{classify_output, CommandRunner};
use crate::softether::types::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A queued unit of work with its reply channel.
struct QueuedUnit {
    seq: u64,
    invocation: Invocation,
    policy: RetryPolicy,
    reply: oneshot::Sender<Result<String, SoftEtherError>>,
}

#[derive(Debug, Default)]
struct BrokerStats {
    submitted: AtomicU64,
    pending: AtomicUsize,
    running: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time broker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSnapshot {
    /// Units waiting behind the one currently executing.
    pub queue_depth: usize,
    pub running: bool,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Handle to the serialized `vpncmd` queue. Cheap to clone.
#[derive(Clone)]
pub struct CommandBroker {
    tx: mpsc::UnboundedSender<QueuedUnit>,
    stats: Arc<BrokerStats>,
    default_policy: RetryPolicy,
}

impl CommandBroker {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(runner: Arc<dyn CommandRunner>, default_policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(BrokerStats::default());
        tokio::spawn(run_worker(runner, rx, stats.clone()));
        info!("Command broker started (max retries {})", default_policy.max_retries);
        Self {
            tx,
            stats,
            default_policy,
        }
    }

    /// Enqueue an invocation and wait for its result.
    ///
    /// `policy` overrides the broker default for this unit only.
    pub async fn submit(
        &self,
        invocation: Invocation,
        policy: Option<RetryPolicy>,
    ) -> Result<String, SoftEtherError> {
        let (reply, rx) = oneshot::channel();
        let seq = self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.stats.pending.fetch_add(1, Ordering::SeqCst);

        let unit = QueuedUnit {
            seq,
            invocation,
            policy: policy.unwrap_or(self.default_policy),
            reply,
        };
        if self.tx.send(unit).is_err() {
            self.stats.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SoftEtherError::process("Command broker is not running"));
        }

        rx.await
            .map_err(|_| SoftEtherError::process("Command broker dropped the request"))?
    }

    /// Run a single `/CMD` command with the default policy.
    pub async fn run<S: AsRef<str>>(&self, command: &str, args: &[S]) -> Result<String, SoftEtherError> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.submit(Invocation::command(command, args), None).await
    }

    /// Pipe a newline-separated script with the default policy.
    pub async fn run_script(&self, lines: Vec<String>) -> Result<String, SoftEtherError> {
        self.submit(Invocation::Script(lines), None).await
    }

    pub fn queue_depth(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            queue_depth: self.stats.pending.load(Ordering::SeqCst),
            running: self.stats.running.load(Ordering::SeqCst),
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            retries: self.stats.retries.load(Ordering::SeqCst),
        }
    }
}

async fn run_worker(
    runner: Arc<dyn CommandRunner>,
    mut rx: mpsc::UnboundedReceiver<QueuedUnit>,
    stats: Arc<BrokerStats>,
) {
    while let Some(unit) = rx.recv().await {
        stats.pending.fetch_sub(1, Ordering::SeqCst);
        stats.running.store(true, Ordering::SeqCst);

        let (result, retries) = execute_with_retry(runner.as_ref(), &unit.invocation, &unit.policy).await;

        stats.retries.fetch_add(retries as u64, Ordering::SeqCst);
        match result {
            Ok(_) => stats.completed.fetch_add(1, Ordering::SeqCst),
            Err(_) => stats.failed.fetch_add(1, Ordering::SeqCst),
        };
        stats.running.store(false, Ordering::SeqCst);

        if unit.reply.send(result).is_err() {
            debug!("Caller for unit #{} went away before completion", unit.seq);
        }
    }
    debug!("Command broker worker stopped");
}

/// Run one invocation, retrying transient failures per `policy`.
///
/// Returns the final result and the number of retries spent.
pub async fn execute_with_retry(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    policy: &RetryPolicy,
) -> (Result<String, SoftEtherError>, u32) {
    let mut attempt: u32 = 0;
    loop {
        let outcome = match runner.run(invocation).await {
            Ok(output) => classify_output(invocation, &output),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(stdout) => return (Ok(stdout), attempt),
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed transiently ({}); retry {}/{} in {:?}",
                    invocation.name(),
                    err.message,
                    attempt + 1,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(mut err) => {
                if attempt > 0 {
                    err.message = format!("{} (gave up after {} retries)", err.message, attempt);
                }
                return (Err(err), attempt);
            }
        }
    }
}

//! Sequential job consumer with connection-loss recovery.
//!
//! The consumer is a two-state machine:
//!
//! - **Disconnected**: connect, declare the queue, set prefetch to 1. On
//!   failure wait the policy delay and try again, forever.
//! - **Consuming**: take one delivery, run it to completion (backup, status
//!   report, ack/reject), then take the next. A broker-level failure moves
//!   back to Disconnected; job-level failures never do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use netbackup_backup::{BackupOutcome, DeviceBackup};
use netbackup_core::log::sanitize;
use netbackup_core::{DeviceKind, Job, UnknownDevice};
use netbackup_notify::StatusReporter;
use netbackup_queue::{parse_job, QueueConnector, QueueError, QueueMessage, QueueSession};

use crate::policy::{FixedDelay, ReconnectPolicy};

/// Default wait between receiving a job and starting it.
pub const DEFAULT_PROCESS_DELAY: Duration = Duration::from_secs(5);

/// Default wait before every reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Consuming,
}

/// What happened to a delivery. Nothing is ever requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Removed from the queue after a backup attempt.
    Acked,
    /// Dropped without requeue: malformed or unsupported.
    Rejected,
}

/// Why a consuming session ended.
enum SessionEnd {
    Shutdown,
    Lost(QueueError),
}

// ── Stats ────────────────────────────────────────────────────────────

/// Counters updated as the consumer runs.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub connection_losses: AtomicU64,
    pub acked: AtomicU64,
    pub rejected: AtomicU64,
    pub report_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connects: u64,
    pub connect_failures: u64,
    pub connection_losses: u64,
    pub acked: u64,
    pub rejected: u64,
    pub report_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connection_losses: self.connection_losses.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Fluent builder for a [`QueueConsumer`].
///
/// # Example
/// ```ignore
/// let consumer = QueueConsumer::builder(connector, reporter)
///     .device(DeviceKind::Ubnt, executor)
///     .process_delay(Duration::from_secs(5))
///     .reconnect_policy(FixedDelay(Duration::from_secs(5)))
///     .build();
/// ```
pub struct ConsumerBuilder {
    connector: Arc<dyn QueueConnector>,
    reporter: Arc<dyn StatusReporter>,
    backends: HashMap<DeviceKind, Arc<dyn DeviceBackup>>,
    policy: Arc<dyn ReconnectPolicy>,
    process_delay: Duration,
}

impl ConsumerBuilder {
    /// Register the backup implementation for a device kind.
    pub fn device(mut self, kind: DeviceKind, backup: Arc<dyn DeviceBackup>) -> Self {
        self.backends.insert(kind, backup);
        self
    }

    /// Set the wait inserted before each job is processed (default: 5s).
    pub fn process_delay(mut self, delay: Duration) -> Self {
        self.process_delay = delay;
        self
    }

    /// Set the reconnect policy (default: fixed 5s).
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn build(self) -> QueueConsumer {
        QueueConsumer {
            connector: self.connector,
            reporter: self.reporter,
            backends: self.backends,
            policy: self.policy,
            process_delay: self.process_delay,
            stats: Arc::new(ConsumerStats::default()),
        }
    }
}

// ── QueueConsumer ────────────────────────────────────────────────────

/// Receives backup jobs one at a time and drives each to a terminal
/// acknowledgment decision.
///
/// Each instance owns its own broker session; run several processes (each
/// with prefetch 1) against the same queue to scale out.
pub struct QueueConsumer {
    connector: Arc<dyn QueueConnector>,
    reporter: Arc<dyn StatusReporter>,
    backends: HashMap<DeviceKind, Arc<dyn DeviceBackup>>,
    policy: Arc<dyn ReconnectPolicy>,
    process_delay: Duration,
    stats: Arc<ConsumerStats>,
}

impl QueueConsumer {
    pub fn builder(
        connector: Arc<dyn QueueConnector>,
        reporter: Arc<dyn StatusReporter>,
    ) -> ConsumerBuilder {
        ConsumerBuilder {
            connector,
            reporter,
            backends: HashMap::new(),
            policy: Arc::new(FixedDelay(DEFAULT_RECONNECT_DELAY)),
            process_delay: DEFAULT_PROCESS_DELAY,
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Consume until `shutdown` is notified.
    ///
    /// Broker outages are retried indefinitely. Shutdown is only observed
    /// between jobs, so an in-flight job always finishes its report and
    /// acknowledgment.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let queue = self.connector.queue_name().to_string();
        let mut attempt: u32 = 0;
        let mut state = ConsumerState::Disconnected;
        debug!(queue = %queue, ?state, "consumer starting");

        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!(queue = %queue, "shutdown requested while disconnected");
                    return;
                }
                result = self.connector.connect() => result,
            };

            let mut session = match connected {
                Ok(session) => session,
                Err(e) => {
                    ConsumerStats::bump(&self.stats.connect_failures);
                    attempt = attempt.saturating_add(1);
                    let delay = self.policy.delay(attempt);
                    warn!(queue = %queue, error = %e, attempt, ?delay, "Failed to connect to broker, retrying");
                    if self.pause(delay, &shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            attempt = 0;
            state = ConsumerState::Consuming;
            ConsumerStats::bump(&self.stats.connects);
            info!(queue = %queue, ?state, "Waiting for messages");

            match self.consume(session.as_mut(), &shutdown).await {
                SessionEnd::Shutdown => {
                    session.close().await;
                    info!(queue = %queue, "consumer stopped");
                    return;
                }
                SessionEnd::Lost(e) => {
                    drop(session);
                    state = ConsumerState::Disconnected;
                    ConsumerStats::bump(&self.stats.connection_losses);
                    attempt = attempt.saturating_add(1);
                    let delay = self.policy.delay(attempt);
                    warn!(queue = %queue, error = %e, ?state, ?delay, "Connection lost, attempting reconnect");
                    if self.pause(delay, &shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep for `delay`; returns true if shutdown arrived first.
    async fn pause(&self, delay: Duration, shutdown: &Notify) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.notified() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn consume(&self, session: &mut dyn QueueSession, shutdown: &Notify) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.notified() => return SessionEnd::Shutdown,
                next = session.next_message() => next,
            };

            let msg = match next {
                Ok(Some(msg)) => msg,
                Ok(None) => return SessionEnd::Lost(QueueError::StreamClosed),
                Err(e) => return SessionEnd::Lost(e),
            };

            if let Err(e) = self.handle(session, msg).await {
                return SessionEnd::Lost(e);
            }
        }
    }

    /// Drive one delivery to its acknowledgment decision.
    ///
    /// Returns `Err` only for broker-level failures (ack/reject could not be
    /// sent); everything about the job itself is handled here.
    pub async fn handle(
        &self,
        session: &mut dyn QueueSession,
        msg: QueueMessage,
    ) -> Result<Disposition, QueueError> {
        let tag = msg.delivery_tag;

        let job = match parse_job(&msg) {
            Ok(job) => job,
            Err(e) => {
                warn!(delivery_tag = tag, error = %sanitize(&e.to_string()), "Rejecting malformed job");
                return self.settle(session, tag, Disposition::Rejected).await;
            }
        };

        info!(
            job_id = %sanitize(&job.id),
            address = %sanitize(&job.address),
            device = %sanitize(&job.device),
            redelivered = msg.redelivered,
            "Received backup request"
        );
        if !self.process_delay.is_zero() {
            tokio::time::sleep(self.process_delay).await;
        }

        let (status, disposition) = match self.backend_for(&job) {
            Ok(backup) => {
                let outcome = self.run_backup(backup, &job).await;
                (outcome.status_text(), Disposition::Acked)
            }
            Err(unknown) => {
                warn!(job_id = %sanitize(&job.id), device = %sanitize(&unknown.0), "Unknown device field");
                (unknown.to_string(), Disposition::Rejected)
            }
        };

        self.report(&job.id, &status).await;
        self.settle(session, tag, disposition).await
    }

    fn backend_for(&self, job: &Job) -> Result<Arc<dyn DeviceBackup>, UnknownDevice> {
        let kind = job.device_kind()?;
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| UnknownDevice(job.device.clone()))
    }

    /// Run the blocking backup off the async runtime and wait for it.
    async fn run_backup(&self, backup: Arc<dyn DeviceBackup>, job: &Job) -> BackupOutcome {
        let address = job.address.clone();
        match tokio::task::spawn_blocking(move || backup.backup(&address)).await {
            Ok(outcome) => {
                debug!(job_id = %sanitize(&job.id), outcome = outcome.kind(), "backup finished");
                outcome
            }
            Err(e) => BackupOutcome::UnexpectedError {
                detail: format!("backup task failed: {e}"),
            },
        }
    }

    /// Forward the status; failures are logged and otherwise ignored.
    async fn report(&self, job_id: &str, status: &str) {
        let shown_id = sanitize(job_id);
        match self.reporter.report(job_id, status).await {
            Ok(()) => debug!(job_id = %shown_id, channel = self.reporter.channel_name(), "status reported"),
            Err(e) => {
                ConsumerStats::bump(&self.stats.report_failures);
                warn!(
                    job_id = %shown_id,
                    channel = self.reporter.channel_name(),
                    error = %e,
                    "Failed to report backup status"
                );
            }
        }
    }

    async fn settle(
        &self,
        session: &mut dyn QueueSession,
        tag: u64,
        disposition: Disposition,
    ) -> Result<Disposition, QueueError> {
        match disposition {
            Disposition::Acked => {
                session.ack(tag).await?;
                ConsumerStats::bump(&self.stats.acked);
            }
            Disposition::Rejected => {
                session.reject(tag).await?;
                ConsumerStats::bump(&self.stats.rejected);
            }
        }
        Ok(disposition)
    }
}

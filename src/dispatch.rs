use crate::config::{DispatchConfig, EmailConfig};
use crate::error::PipelineError;
use crate::rate_limit::Clock;
use crate::store::{EmailLog, EmailStatus, EmailType, Lead, LeadStore};
use crate::template::{render_admin_notification, render_cv_email, RenderedEmail};
use crate::transport::{MailTransport, OutboundMessage, TransportError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct DispatchJob {
    lead_id: Uuid,
    email_type: EmailType,
}

/// Asynchronous email dispatcher: `queue` records a queued EmailLog row and
/// hands the job to a bounded worker pool, so the request path never waits
/// on the transport. Workers retry transient failures with exponential
/// backoff up to the configured ceiling, then record a terminal outcome.
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchJob>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    store: Arc<LeadStore>,
    transport: Arc<dyn MailTransport>,
    email_config: EmailConfig,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn start(
        dispatch_config: DispatchConfig,
        email_config: EmailConfig,
        store: Arc<LeadStore>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(dispatch_config.queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let handles = (0..dispatch_config.workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    worker_id,
                    dispatch_config: dispatch_config.clone(),
                    email_config: email_config.clone(),
                    store: store.clone(),
                    transport: transport.clone(),
                    clock: clock.clone(),
                    rx: rx.clone(),
                    tx: tx.clone(),
                    in_flight: in_flight.clone(),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Dispatcher {
            tx,
            shutdown_tx,
            handles: Mutex::new(handles),
            store,
            transport,
            email_config,
            clock,
        }
    }

    /// Queues one email for the lead. Returns as soon as the queued EmailLog
    /// row is durable; delivery happens on the worker pool.
    pub fn queue(&self, lead: &Lead, email_type: EmailType) -> Result<EmailLog, PipelineError> {
        let (recipient, subject) = match email_type {
            EmailType::CvDelivery => (lead.email.clone(), self.email_config.cv_subject.clone()),
            EmailType::AdminNotification => (
                self.email_config.admin_address.clone(),
                format!("New CV request: {}", lead.name),
            ),
        };

        let row = self.store.enqueue_email(
            lead.id,
            &recipient,
            &subject,
            email_type,
            self.clock.now(),
        )?;

        let job = DispatchJob {
            lead_id: lead.id,
            email_type,
        };
        if let Err(e) = self.tx.try_send(job) {
            // Row stays queued; an admin re-dispatch will pick it up
            log::error!(
                "dispatch queue rejected job for lead {} ({}): {e}",
                lead.id,
                email_type.as_str()
            );
        }
        Ok(row)
    }

    pub fn transport_healthy(&self) -> bool {
        self.transport.healthy()
    }

    /// Graceful drain: workers finish the job they hold, queued jobs that
    /// have not started are abandoned (their rows stay `queued`).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

struct Worker {
    worker_id: usize,
    dispatch_config: DispatchConfig,
    email_config: EmailConfig,
    store: Arc<LeadStore>,
    transport: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchJob>>>,
    tx: mpsc::Sender<DispatchJob>,
    in_flight: Arc<Mutex<HashSet<(Uuid, EmailType)>>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        log::debug!("dispatch worker {} started", self.worker_id);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let job = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                job = recv_job(&self.rx) => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        log::debug!("dispatch worker {} stopped", self.worker_id);
    }

    async fn process(&self, job: DispatchJob) {
        let key = (job.lead_id, job.email_type);
        // The guard must not span an await point
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key);
        if !inserted {
            // Another worker holds this lead/email_type; hand it back
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Err(e) = self.tx.try_send(job) {
                log::warn!(
                    "colliding dispatch job for lead {} ({}) dropped: {e}; row stays queued for re-dispatch",
                    job.lead_id,
                    job.email_type.as_str()
                );
            }
            return;
        }
        self.deliver(job).await;
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&key);
    }

    async fn deliver(&self, job: DispatchJob) {
        let lead = match self.store.get(job.lead_id) {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                log::warn!("dispatch job for unknown lead {}", job.lead_id);
                return;
            }
            Err(e) => {
                log::error!("store lookup failed for lead {}: {e}", job.lead_id);
                return;
            }
        };

        if lead.is_erased() {
            self.record(job, EmailStatus::Failed, Some("lead erased before dispatch"), 0);
            return;
        }

        let rendered = match job.email_type {
            EmailType::CvDelivery => match render_cv_email(&self.email_config, &lead) {
                Ok(rendered) => rendered,
                Err(e) => {
                    log::error!("render failed for lead {}: {e}", lead.id);
                    self.record(job, EmailStatus::Failed, Some(&e.to_string()), 0);
                    return;
                }
            },
            EmailType::AdminNotification => render_admin_notification(&lead),
        };

        let recipient = match job.email_type {
            EmailType::CvDelivery => lead.email.clone(),
            EmailType::AdminNotification => self.email_config.admin_address.clone(),
        };
        let message = self.build_message(&rendered, &recipient);
        self.attempt_loop(job, message).await;
    }

    fn build_message(&self, rendered: &RenderedEmail, recipient: &str) -> OutboundMessage {
        let from = format!(
            "{} <{}>",
            self.email_config.from_name, self.email_config.from_address
        );
        OutboundMessage {
            mime: rendered.to_mime(&from, recipient, self.clock.now()),
            from,
            to: recipient.to_string(),
            subject: rendered.subject.clone(),
        }
    }

    async fn attempt_loop(&self, job: DispatchJob, message: OutboundMessage) {
        let max_attempts = self.dispatch_config.max_attempts.max(1);
        let attempt_timeout = Duration::from_millis(self.dispatch_config.attempt_timeout_ms);
        let budget = Duration::from_millis(self.dispatch_config.total_budget_ms);
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if started.elapsed() > budget {
                last_error = format!("dispatch budget exhausted: {last_error}");
                break;
            }

            match attempt_send(self.transport.clone(), message.clone(), attempt_timeout).await {
                Ok(()) => {
                    log::info!(
                        "email {} sent for lead {} on attempt {attempt}",
                        job.email_type.as_str(),
                        job.lead_id
                    );
                    self.record(job, EmailStatus::Sent, None, attempt);
                    return;
                }
                Err(TransportError::Bounce(reason)) => {
                    log::warn!(
                        "email {} for lead {} bounced: {reason}",
                        job.email_type.as_str(),
                        job.lead_id
                    );
                    self.record(job, EmailStatus::Bounced, Some(&reason), attempt);
                    return;
                }
                Err(TransportError::Permanent(reason)) => {
                    log::error!(
                        "email {} for lead {} failed permanently: {reason}",
                        job.email_type.as_str(),
                        job.lead_id
                    );
                    self.record(job, EmailStatus::Failed, Some(&reason), attempt);
                    return;
                }
                Err(TransportError::Transient(reason)) => {
                    log::warn!(
                        "email {} for lead {} attempt {attempt}/{max_attempts} failed: {reason}",
                        job.email_type.as_str(),
                        job.lead_id
                    );
                    last_error = reason;
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff_delay(
                            self.dispatch_config.retry_base_ms,
                            attempt,
                        ))
                        .await;
                    }
                }
            }
        }

        // Retry ceiling reached: terminal failure, surfaced to admin tooling
        // through the EmailLog row, never re-queued automatically.
        log::error!(
            "email {} for lead {} failed after {max_attempts} attempts: {last_error}",
            job.email_type.as_str(),
            job.lead_id
        );
        self.record(job, EmailStatus::Failed, Some(&last_error), max_attempts);
    }

    fn record(&self, job: DispatchJob, status: EmailStatus, error: Option<&str>, attempts: u32) {
        if let Err(e) = self.store.record_email_outcome(
            job.lead_id,
            job.email_type,
            status,
            error,
            attempts,
            self.clock.now(),
        ) {
            log::error!(
                "failed to record email outcome for lead {}: {e}",
                job.lead_id
            );
        }
    }
}

async fn recv_job(rx: &Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchJob>>>) -> Option<DispatchJob> {
    rx.lock().await.recv().await
}

/// Doubles per attempt from `base_ms`; the exponent is capped so a large
/// max_attempts cannot overflow the shift.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    Duration::from_millis(base_ms.saturating_mul(1u64 << shift))
}

/// Runs one blocking send on the blocking pool. An attempt that overruns
/// its timeout is still awaited to completion before this returns, so two
/// sends for the same job can never overlap and a late success is recorded
/// as sent instead of being retried into a duplicate delivery. The overrun
/// counts against the job's total budget.
async fn attempt_send(
    transport: Arc<dyn MailTransport>,
    message: OutboundMessage,
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut handle = tokio::task::spawn_blocking(move || transport.send(&message));
    let joined = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            log::warn!(
                "send attempt exceeded {}ms, waiting for it to settle",
                timeout.as_millis()
            );
            handle.await
        }
    };
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(TransportError::Permanent(format!(
            "transport task failed: {join_err}"
        ))),
    }
}

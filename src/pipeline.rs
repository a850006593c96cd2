use crate::config::Config;
use crate::consent::ConsentLedger;
use crate::dispatch::Dispatcher;
use crate::error::PipelineError;
use crate::rate_limit::{Clock, RateLimiter};
use crate::spam::SpamGuard;
use crate::store::{EmailLog, EmailStatus, EmailType, LeadStatus, LeadStore, Origin};
use crate::transport::MailTransport;
use crate::validator::{Submission, Validator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct IntakeResponse {
    pub success: bool,
    pub message: String,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStatus {
    pub request_id: Uuid,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub email_status: Option<EmailStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub store: bool,
    pub transport: bool,
}

/// The intake pipeline: validate -> spam-check -> rate-limit -> persist ->
/// queue dispatch. Rejections happen early and cheaply, before anything is
/// stored; the response returns as soon as the lead is durable, never
/// waiting on the mail transport.
pub struct Pipeline {
    validator: Validator,
    spam: SpamGuard,
    limiter: RateLimiter,
    store: Arc<LeadStore>,
    ledger: ConsentLedger,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        store: Arc<LeadStore>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Dispatcher::start(
            config.dispatch.clone(),
            config.email.clone(),
            store.clone(),
            transport,
            clock.clone(),
        );
        Pipeline {
            validator: Validator::new(),
            spam: SpamGuard::from_config(&config.spam),
            limiter: RateLimiter::new(
                config.rate_limit.max_requests,
                config.rate_limit.window_seconds,
            ),
            ledger: ConsentLedger::new(store.clone()),
            store,
            dispatcher,
            clock,
        }
    }

    pub fn handle_intake(
        &self,
        submission: &Submission,
        origin: &Origin,
    ) -> Result<IntakeResponse, PipelineError> {
        let now = self.clock.now();

        let payload = self.validator.validate(submission)?;

        self.spam
            .check(&submission.website, &payload, now)
            .map_err(|reason| {
                log::warn!(
                    "spam rejection from {}: {reason}",
                    origin.ip_address.as_deref().unwrap_or("unknown")
                );
                PipelineError::SpamRejected { reason }
            })?;

        let source_key = origin.ip_address.as_deref().unwrap_or("unknown");
        self.limiter
            .admit(source_key, now)
            .map_err(|retry_after| PipelineError::RateLimited { retry_after })?;

        let created = self.store.create(&payload, origin, now)?;
        let lead = &created.lead;

        if created.deduplicated {
            return Ok(IntakeResponse {
                success: true,
                message: "CV request already received. Please check your inbox.".to_string(),
                request_id: lead.id,
                timestamp: now,
            });
        }

        log::info!(
            "lead {} created from {} (source {})",
            lead.id,
            source_key,
            lead.source
        );

        // The lead is durable; anything past this point is an operational
        // concern and must not turn the response into a failure.
        if let Err(e) = self.store.record_event(
            "cv_requested",
            json!({ "lead_id": lead.id, "source": lead.source }),
            origin,
            now,
        ) {
            log::error!("failed to record analytics event for lead {}: {e}", lead.id);
        }
        if let Err(e) = self.dispatcher.queue(lead, EmailType::CvDelivery) {
            log::error!("failed to queue CV delivery for lead {}: {e}", lead.id);
        }
        if let Err(e) = self.dispatcher.queue(lead, EmailType::AdminNotification) {
            log::error!(
                "failed to queue admin notification for lead {}: {e}",
                lead.id
            );
        }

        Ok(IntakeResponse {
            success: true,
            message: "CV request processed successfully. You should receive the CV via email shortly."
                .to_string(),
            request_id: lead.id,
            timestamp: now,
        })
    }

    /// Public status lookup by request id (the lead id returned at intake).
    pub fn request_status(&self, id: Uuid) -> Result<RequestStatus, PipelineError> {
        let lead = self.store.get(id)?.ok_or(PipelineError::NotFound(id))?;
        let email_status = self
            .store
            .email_row(id, EmailType::CvDelivery)?
            .map(|row| row.status);
        Ok(RequestStatus {
            request_id: lead.id,
            status: lead.status,
            created_at: lead.created_at,
            email_status,
        })
    }

    /// Re-queues one email for a lead whose earlier dispatch failed, bounced
    /// or whose queued job was dropped. Resets the EmailLog row to `queued`
    /// and hands a fresh job to the worker pool.
    pub fn redispatch(&self, id: Uuid, email_type: EmailType) -> Result<EmailLog, PipelineError> {
        let lead = self.store.get(id)?.ok_or(PipelineError::NotFound(id))?;
        self.dispatcher.queue(&lead, email_type)
    }

    /// Store and transport are probed independently so a dependency outage
    /// is distinguishable from a core-logic failure.
    pub fn health(&self) -> Health {
        let store = self.store.healthy();
        let transport = self.dispatcher.transport_healthy();
        Health {
            status: if store && transport {
                "healthy"
            } else {
                "degraded"
            },
            store,
            transport,
        }
    }

    pub fn store(&self) -> &Arc<LeadStore> {
        &self.store
    }

    pub fn ledger(&self) -> &ConsentLedger {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

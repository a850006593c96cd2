use crate::config::AdminToken;
use crate::consent::ConsentLedger;
use crate::error::PipelineError;
use crate::rate_limit::Clock;
use crate::store::{Lead, LeadFilter, LeadPage, LeadStatus, LeadStore, Page};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub subject: String,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("authentication denied")]
    Denied,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// External authentication capability. The pipeline never inspects
/// credentials itself; the caller layer supplies something that can turn a
/// bearer token into an admin identity.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<AdminIdentity, AdminError>;
}

/// Token-list authenticator backed by the config file. Stands in for the
/// JWT verifier in deployments that terminate auth elsewhere.
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: &[AdminToken]) -> Self {
        StaticTokenAuthenticator {
            tokens: tokens
                .iter()
                .map(|t| (t.token.clone(), t.subject.clone()))
                .collect(),
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn verify(&self, token: &str) -> Result<AdminIdentity, AdminError> {
        self.tokens
            .get(token)
            .map(|subject| AdminIdentity {
                subject: subject.clone(),
            })
            .ok_or(AdminError::Denied)
    }
}

/// Admin read/update surface over the lead store. Every operation verifies
/// the caller's token before touching data; delete maps to erasure, not a
/// row drop, so audit history survives.
pub struct AdminApi {
    store: Arc<LeadStore>,
    ledger: ConsentLedger,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
}

impl AdminApi {
    pub fn new(
        store: Arc<LeadStore>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AdminApi {
            ledger: ConsentLedger::new(store.clone()),
            store,
            authenticator,
            clock,
        }
    }

    /// Token check alone, for callers composing admin-gated operations that
    /// live outside this surface (e.g. email re-dispatch on the pipeline).
    pub fn authenticate(&self, token: &str) -> Result<AdminIdentity, AdminError> {
        self.authenticator.verify(token)
    }

    pub fn list_leads(
        &self,
        token: &str,
        filter: &LeadFilter,
        page: &Page,
    ) -> Result<LeadPage, AdminError> {
        self.authenticator.verify(token)?;
        Ok(self.store.list(filter, page)?)
    }

    pub fn get_lead(&self, token: &str, id: Uuid) -> Result<Lead, AdminError> {
        self.authenticator.verify(token)?;
        self.store
            .get(id)?
            .ok_or(AdminError::Pipeline(PipelineError::NotFound(id)))
    }

    pub fn update_status(
        &self,
        token: &str,
        id: Uuid,
        status: LeadStatus,
        notes: Option<&str>,
    ) -> Result<Lead, AdminError> {
        let identity = self.authenticator.verify(token)?;
        let lead = self
            .store
            .update_status(id, status, notes, self.clock.now())?;
        log::info!(
            "admin {} set lead {id} to {status}",
            identity.subject
        );
        Ok(lead)
    }

    pub fn delete_lead(&self, token: &str, id: Uuid) -> Result<(), AdminError> {
        let identity = self.authenticator.verify(token)?;
        self.ledger.erase(id, self.clock.now())?;
        log::info!("admin {} erased lead {id}", identity.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::SystemClock;
    use crate::store::{LeadSource, Origin};
    use crate::validator::LeadPayload;
    use chrono::Utc;

    fn api() -> (AdminApi, Arc<LeadStore>, Uuid) {
        let store = Arc::new(LeadStore::open_in_memory(60).unwrap());
        let lead = store
            .create(
                &LeadPayload {
                    name: "Jane Doe".to_string(),
                    email: "jane@b.com".to_string(),
                    phone: "5550102345".to_string(),
                    company: None,
                    role: None,
                    purpose: None,
                    source: LeadSource::CvRequest,
                },
                &Origin::default(),
                Utc::now(),
            )
            .unwrap()
            .lead;
        let authenticator = Arc::new(StaticTokenAuthenticator::new(&[AdminToken {
            token: "secret".to_string(),
            subject: "ops".to_string(),
        }]));
        (
            AdminApi::new(store.clone(), authenticator, Arc::new(SystemClock)),
            store,
            lead.id,
        )
    }

    #[test]
    fn test_bad_token_denied_before_store_access() {
        let (api, _, id) = api();
        assert!(matches!(
            api.get_lead("wrong", id),
            Err(AdminError::Denied)
        ));
        assert!(matches!(
            api.list_leads("", &LeadFilter::default(), &Page::default()),
            Err(AdminError::Denied)
        ));
    }

    #[test]
    fn test_update_status_through_api() {
        let (api, _, id) = api();
        let lead = api
            .update_status("secret", id, LeadStatus::Contacted, Some("called"))
            .unwrap();
        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.notes.as_deref(), Some("called"));
    }

    #[test]
    fn test_delete_maps_to_erase() {
        let (api, store, id) = api();
        api.delete_lead("secret", id).unwrap();

        let stub = store.get(id).unwrap().unwrap();
        assert!(stub.is_erased());
        // Idempotent on repeat
        api.delete_lead("secret", id).unwrap();
    }
}

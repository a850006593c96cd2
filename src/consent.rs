use crate::error::PipelineError;
use crate::store::{Lead, LeadStore, Origin};
use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// The only writer allowed to null out PII on a lead. Operates orthogonally
/// to the intake pipeline, keyed by lead identity.
pub struct ConsentLedger {
    store: Arc<LeadStore>,
}

impl ConsentLedger {
    pub fn new(store: Arc<LeadStore>) -> Self {
        ConsentLedger { store }
    }

    /// Withdraws consent: scrubs direct PII, keeps the email as a sha256
    /// digest for audit, and appends a `consent_withdrawn` event. Repeat
    /// calls are no-ops.
    pub fn withdraw(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), PipelineError> {
        let lead = self.store.get(id)?.ok_or(PipelineError::NotFound(id))?;
        let email_hash = hash_email(&lead.email);

        if self.store.withdraw_consent(id, &email_hash, now)? {
            self.store.record_event(
                "consent_withdrawn",
                json!({ "lead_id": id, "email_hash": email_hash }),
                &Origin::default(),
                now,
            )?;
            log::info!("consent withdrawn for lead {id}");
        }
        Ok(())
    }

    /// Right-to-erasure. The anonymized stub and its redacted EmailLog rows
    /// survive; everything identifying is gone. Repeat calls are no-ops.
    pub fn erase(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), PipelineError> {
        if self.store.erase(id, now)? {
            self.store.record_event(
                "lead_erased",
                json!({ "lead_id": id }),
                &Origin::default(),
                now,
            )?;
            log::info!("lead {id} erased");
        }
        Ok(())
    }

    /// Data-portability export: the full current record plus email history.
    /// An erased lead is gone for export purposes.
    pub fn export(&self, id: Uuid) -> Result<serde_json::Value, PipelineError> {
        let lead = self.store.get(id)?.ok_or(PipelineError::NotFound(id))?;
        if lead.is_erased() {
            return Err(PipelineError::NotFound(id));
        }
        let email_history = self.store.email_log(id)?;
        Ok(json!({
            "lead": export_lead(&lead),
            "email_history": email_history,
        }))
    }
}

fn export_lead(lead: &Lead) -> serde_json::Value {
    serde_json::to_value(lead).unwrap_or(serde_json::Value::Null)
}

pub fn hash_email(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LeadSource, REDACTED_WITHDRAWN};
    use crate::validator::LeadPayload;
    use chrono::TimeZone;

    fn setup() -> (Arc<LeadStore>, ConsentLedger, Uuid) {
        let store = Arc::new(LeadStore::open_in_memory(60).unwrap());
        let ledger = ConsentLedger::new(store.clone());
        let lead = store
            .create(
                &LeadPayload {
                    name: "Jane Doe".to_string(),
                    email: "jane@b.com".to_string(),
                    phone: "5550102345".to_string(),
                    company: None,
                    role: None,
                    purpose: Some("hiring".to_string()),
                    source: LeadSource::CvRequest,
                },
                &Origin::default(),
                t0(),
            )
            .unwrap()
            .lead;
        (store, ledger, lead.id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_withdraw_scrubs_and_hashes() {
        let (store, ledger, id) = setup();
        ledger.withdraw(id, t0()).unwrap();

        let lead = store.get(id).unwrap().unwrap();
        assert!(!lead.consent_given);
        assert_eq!(lead.name, REDACTED_WITHDRAWN);
        assert_eq!(lead.email, hash_email("jane@b.com"));

        // Idempotent on repeat
        ledger.withdraw(id, t0()).unwrap();
    }

    #[test]
    fn test_export_after_erase_is_not_found() {
        let (_store, ledger, id) = setup();

        let export = ledger.export(id).unwrap();
        assert_eq!(export["lead"]["email"], "jane@b.com");

        ledger.erase(id, t0()).unwrap();
        match ledger.export(id) {
            Err(PipelineError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }

        // Erase and withdraw stay no-ops afterwards
        ledger.erase(id, t0()).unwrap();
        ledger.withdraw(id, t0()).unwrap();
    }

    #[test]
    fn test_export_unknown_lead_not_found() {
        let (_store, ledger, _) = setup();
        assert!(matches!(
            ledger.export(Uuid::new_v4()),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn test_hash_email_normalizes_case() {
        assert_eq!(hash_email("Jane@B.com"), hash_email(" jane@b.com "));
    }
}

use crate::config::SpamConfig;
use crate::validator::LeadPayload;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// A pluggable pre-persistence spam check. Returns a rejection reason when
/// the payload looks automated, `None` otherwise.
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;
    fn inspect(&self, payload: &LeadPayload, now: DateTime<Utc>) -> Option<String>;
}

/// Honeypot plus configured heuristics, evaluated before anything is stored.
pub struct SpamGuard {
    heuristics: Vec<Box<dyn Heuristic>>,
}

impl SpamGuard {
    pub fn from_config(config: &SpamConfig) -> Self {
        let mut heuristics: Vec<Box<dyn Heuristic>> = Vec::new();
        if config.velocity_enabled {
            heuristics.push(Box::new(VelocityHeuristic::new(
                config.velocity_max_submissions,
                config.velocity_window_seconds,
            )));
        }
        SpamGuard { heuristics }
    }

    /// `honeypot` is the raw hidden `website` field: any non-empty value is
    /// an automated submission, legitimate browsers never fill it.
    pub fn check(
        &self,
        honeypot: &str,
        payload: &LeadPayload,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if !honeypot.trim().is_empty() {
            return Err("honeypot field populated".to_string());
        }

        for heuristic in &self.heuristics {
            if let Some(reason) = heuristic.inspect(payload, now) {
                log::warn!(
                    "spam heuristic '{}' rejected submission from {}: {}",
                    heuristic.name(),
                    payload.email,
                    reason
                );
                return Err(reason);
            }
        }
        Ok(())
    }
}

/// Flags bursts of submissions for one exact email address. Counts are kept
/// in memory only and pruned as their window lapses.
struct VelocityHeuristic {
    max_submissions: u32,
    window: Duration,
    seen: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl VelocityHeuristic {
    fn new(max_submissions: u32, window_seconds: u64) -> Self {
        VelocityHeuristic {
            max_submissions,
            window: Duration::seconds(window_seconds as i64),
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl Heuristic for VelocityHeuristic {
    fn name(&self) -> &'static str {
        "submission_velocity"
    }

    fn inspect(&self, payload: &LeadPayload, now: DateTime<Utc>) -> Option<String> {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        seen.retain(|_, stamps| {
            stamps.retain(|t| now - *t < self.window);
            !stamps.is_empty()
        });

        let stamps = seen.entry(payload.email.clone()).or_default();
        if stamps.len() as u32 >= self.max_submissions {
            return Some(format!(
                "{} submissions from {} within the velocity window",
                stamps.len() + 1,
                payload.email
            ));
        }
        stamps.push(now);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LeadSource;
    use chrono::TimeZone;

    fn payload(email: &str) -> LeadPayload {
        LeadPayload {
            name: "Jane Doe".to_string(),
            email: email.to_string(),
            phone: "5550102345".to_string(),
            company: None,
            role: None,
            purpose: None,
            source: LeadSource::CvRequest,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_nonempty_honeypot_rejected() {
        let guard = SpamGuard::from_config(&SpamConfig::default());
        let err = guard
            .check("http://spam.example", &payload("a@b.com"), t0())
            .unwrap_err();
        assert!(err.contains("honeypot"));
    }

    #[test]
    fn test_empty_honeypot_passes() {
        let guard = SpamGuard::from_config(&SpamConfig::default());
        assert!(guard.check("", &payload("a@b.com"), t0()).is_ok());
        assert!(guard.check("  ", &payload("a@b.com"), t0()).is_ok());
    }

    #[test]
    fn test_velocity_heuristic_trips_after_limit() {
        let config = SpamConfig {
            velocity_enabled: true,
            velocity_max_submissions: 2,
            velocity_window_seconds: 600,
        };
        let guard = SpamGuard::from_config(&config);
        let now = t0();

        assert!(guard.check("", &payload("a@b.com"), now).is_ok());
        assert!(guard.check("", &payload("a@b.com"), now).is_ok());
        assert!(guard.check("", &payload("a@b.com"), now).is_err());
        // A different address is unaffected
        assert!(guard.check("", &payload("c@d.com"), now).is_ok());
    }

    #[test]
    fn test_velocity_window_expires() {
        let config = SpamConfig {
            velocity_enabled: true,
            velocity_max_submissions: 1,
            velocity_window_seconds: 600,
        };
        let guard = SpamGuard::from_config(&config);
        let now = t0();

        assert!(guard.check("", &payload("a@b.com"), now).is_ok());
        assert!(guard.check("", &payload("a@b.com"), now).is_err());
        let later = now + Duration::seconds(601);
        assert!(guard.check("", &payload("a@b.com"), later).is_ok());
    }

    #[test]
    fn test_heuristics_disabled_by_config() {
        let config = SpamConfig {
            velocity_enabled: false,
            ..SpamConfig::default()
        };
        let guard = SpamGuard::from_config(&config);
        let now = t0();
        for _ in 0..20 {
            assert!(guard.check("", &payload("a@b.com"), now).is_ok());
        }
    }
}

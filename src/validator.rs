use crate::error::{FieldViolation, PipelineError};
use crate::store::LeadSource;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MAX_PURPOSE_CHARS: usize = 500;

/// Raw intake submission as it arrives from the public form. The `website`
/// field is the honeypot: hidden in the form, always empty for humans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub website: String,
}

/// Normalized payload the store accepts. Produced only by the validator.
#[derive(Debug, Clone)]
pub struct LeadPayload {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
    pub role: Option<String>,
    pub purpose: Option<String>,
    pub source: LeadSource,
}

pub struct Validator {
    email_re: Regex,
    phone_re: Regex,
    injection_res: Vec<Regex>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        let injection_patterns = [
            r"(?is)<script.*?>.*?</script>",
            r"(?i)javascript:",
            r"(?i)data:text/html",
            r"(?is)<iframe.*?>.*?</iframe>",
        ];
        Validator {
            email_re: Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
                .unwrap(),
            phone_re: Regex::new(r"^\+?\d{10,15}$").unwrap(),
            injection_res: injection_patterns
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
        }
    }

    /// Checks the submission and returns a normalized payload, collecting
    /// every violated field rather than stopping at the first. Missing or
    /// false consent wins over field errors so a consent-less submission is
    /// always answered with `ConsentRequired`.
    pub fn validate(&self, submission: &Submission) -> Result<LeadPayload, PipelineError> {
        if !submission.consent {
            return Err(PipelineError::ConsentRequired);
        }

        let mut violations = Vec::new();

        let name = submission.name.trim();
        if name.chars().count() < 2 {
            violations.push(FieldViolation::new(
                "name",
                "name must be at least 2 characters long",
            ));
        }

        let email = submission.email.trim();
        if email.is_empty() {
            violations.push(FieldViolation::new("email", "email is required"));
        } else if !self.email_re.is_match(email) {
            violations.push(FieldViolation::new("email", "invalid email format"));
        }

        let phone = submission.phone.trim();
        if phone.is_empty() {
            violations.push(FieldViolation::new("phone", "phone number is required"));
        } else if !self.phone_is_valid(phone) {
            violations.push(FieldViolation::new("phone", "invalid phone number format"));
        }

        if let Some(purpose) = submission.purpose.as_deref() {
            if purpose.chars().count() > MAX_PURPOSE_CHARS {
                violations.push(FieldViolation::new(
                    "purpose",
                    format!("purpose must be at most {MAX_PURPOSE_CHARS} characters"),
                ));
            }
        }

        if let Some(field) = self.find_injection(submission) {
            violations.push(FieldViolation::new(field, "invalid characters detected"));
        }

        if !violations.is_empty() {
            return Err(PipelineError::Validation(violations));
        }

        Ok(LeadPayload {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            company: trimmed_opt(&submission.company),
            role: trimmed_opt(&submission.role),
            purpose: trimmed_opt(&submission.purpose),
            source: LeadSource::CvRequest,
        })
    }

    fn phone_is_valid(&self, phone: &str) -> bool {
        // Strip common separators before matching, keep a leading +
        let cleaned: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        self.phone_re.is_match(&cleaned)
    }

    fn find_injection(&self, submission: &Submission) -> Option<&'static str> {
        let fields: [(&'static str, &str); 6] = [
            ("name", &submission.name),
            ("email", &submission.email),
            ("phone", &submission.phone),
            ("company", submission.company.as_deref().unwrap_or("")),
            ("role", submission.role.as_deref().unwrap_or("")),
            ("purpose", submission.purpose.as_deref().unwrap_or("")),
        ];
        for (field, value) in fields {
            if self.injection_res.iter().any(|re| re.is_match(value)) {
                return Some(field);
            }
        }
        None
    }
}

fn trimmed_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_submission() -> Submission {
        Submission {
            name: "John Smith".to_string(),
            email: "john.smith@company.com".to_string(),
            phone: "+1-555-010-2345".to_string(),
            company: Some("Tech Corp".to_string()),
            role: Some("CTO".to_string()),
            purpose: Some("AI consulting for our platform".to_string()),
            consent: true,
            website: String::new(),
        }
    }

    #[test]
    fn test_valid_submission_normalizes() {
        let validator = Validator::new();
        let payload = validator
            .validate(&Submission {
                name: "  John Smith  ".to_string(),
                ..valid_submission()
            })
            .unwrap();

        assert_eq!(payload.name, "John Smith");
        assert_eq!(payload.email, "john.smith@company.com");
        assert_eq!(payload.source, LeadSource::CvRequest);
    }

    #[test]
    fn test_missing_consent_fails_even_with_bad_fields() {
        let validator = Validator::new();
        let submission = Submission {
            consent: false,
            name: String::new(),
            ..valid_submission()
        };

        match validator.validate(&submission) {
            Err(PipelineError::ConsentRequired) => {}
            other => panic!("expected ConsentRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_all_violations_reported_at_once() {
        let validator = Validator::new();
        let submission = Submission {
            name: "J".to_string(),
            email: "not-an-email".to_string(),
            phone: "123".to_string(),
            ..valid_submission()
        };

        match validator.validate(&submission) {
            Err(PipelineError::Validation(violations)) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field).collect();
                assert_eq!(fields, vec!["name", "email", "phone"]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_purpose_length_cap() {
        let validator = Validator::new();
        let submission = Submission {
            purpose: Some("x".repeat(501)),
            ..valid_submission()
        };

        match validator.validate(&submission) {
            Err(PipelineError::Validation(violations)) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].field, "purpose");
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        let ok = Submission {
            purpose: Some("x".repeat(500)),
            ..valid_submission()
        };
        assert!(validator.validate(&ok).is_ok());
    }

    #[test]
    fn test_phone_separators_accepted() {
        let validator = Validator::new();
        for phone in ["+1-555-010-2345", "(555) 010 2345 99", "5550102345"] {
            let submission = Submission {
                phone: phone.to_string(),
                ..valid_submission()
            };
            assert!(validator.validate(&submission).is_ok(), "phone {phone}");
        }

        let too_short = Submission {
            phone: "12345".to_string(),
            ..valid_submission()
        };
        assert!(validator.validate(&too_short).is_err());
    }

    #[test]
    fn test_name_minimum_counts_characters_not_bytes() {
        let validator = Validator::new();
        for name in ["J", "Ö"] {
            let submission = Submission {
                name: name.to_string(),
                ..valid_submission()
            };
            match validator.validate(&submission) {
                Err(PipelineError::Validation(violations)) => {
                    assert_eq!(violations[0].field, "name", "name {name:?}");
                }
                other => panic!("expected Validation for {name:?}, got {other:?}"),
            }
        }

        let ok = Submission {
            name: "Öz".to_string(),
            ..valid_submission()
        };
        assert!(validator.validate(&ok).is_ok());
    }

    #[test]
    fn test_injection_sweep_rejects_script_tags() {
        let validator = Validator::new();
        let submission = Submission {
            purpose: Some("hello <script>alert(1)</script>".to_string()),
            ..valid_submission()
        };

        match validator.validate(&submission) {
            Err(PipelineError::Validation(violations)) => {
                assert_eq!(violations[0].field, "purpose");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}

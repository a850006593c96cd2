use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket_path: String,
    pub database_path: String,
    pub rate_limit: RateLimitConfig,
    /// Window within which an identical submission (same email + purpose +
    /// source) is absorbed as a duplicate instead of creating a second lead.
    pub dedup_window_seconds: u64,
    pub spam: SpamConfig,
    pub email: EmailConfig,
    pub dispatch: DispatchConfig,
    pub admin_tokens: Vec<AdminToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 3,
            window_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// Reject when the same email address submits more than
    /// `velocity_max_submissions` times inside the velocity window.
    pub velocity_enabled: bool,
    pub velocity_max_submissions: u32,
    pub velocity_window_seconds: u64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        SpamConfig {
            velocity_enabled: true,
            velocity_max_submissions: 5,
            velocity_window_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub from_address: String,
    pub from_name: String,
    /// Recipient of the per-lead admin notification.
    pub admin_address: String,
    pub cv_subject: String,
    pub cv_attachment_path: String,
    pub max_attachment_bytes: u64,
    pub scheduling_url: String,
    pub profile_url: String,
    /// Directory the file-spool transport writes rendered messages into.
    pub outbox_dir: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        EmailConfig {
            from_address: "cv@example.com".to_string(),
            from_name: "CV Gate".to_string(),
            admin_address: "admin@example.com".to_string(),
            cv_subject: "Your requested CV".to_string(),
            cv_attachment_path: "./static/cv.pdf".to_string(),
            max_attachment_bytes: 2 * 1024 * 1024,
            scheduling_url: "https://calendly.com/example/intro-call".to_string(),
            profile_url: "https://www.linkedin.com/in/example".to_string(),
            outbox_dir: "/var/spool/cvgate/outbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub retry_base_ms: u64,
    /// Upper bound on total wall-clock time spent on one dispatch job,
    /// attempts and backoff included.
    pub total_budget_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            workers: 2,
            queue_depth: 256,
            max_attempts: 3,
            attempt_timeout_ms: 10_000,
            retry_base_ms: 500,
            total_budget_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminToken {
    pub token: String,
    pub subject: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: "/var/run/cvgate.sock".to_string(),
            database_path: "/var/lib/cvgate/leads.db".to_string(),
            rate_limit: RateLimitConfig::default(),
            dedup_window_seconds: 60,
            spam: SpamConfig::default(),
            email: EmailConfig::default(),
            dispatch: DispatchConfig::default(),
            admin_tokens: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.rate_limit.max_requests, 3);
        assert_eq!(parsed.rate_limit.window_seconds, 3600);
        assert_eq!(parsed.dedup_window_seconds, 60);
        assert_eq!(parsed.dispatch.max_attempts, 3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "rate_limit:\n  max_requests: 10\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.spam.velocity_max_submissions, 5);
        assert!(config.admin_tokens.is_empty());
    }
}

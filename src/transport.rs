use anyhow::Context;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth retrying: timeouts, connection resets, 4xx greylisting.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// The remote reported the recipient as undeliverable.
    #[error("recipient bounced: {0}")]
    Bounce(String),
    /// Not worth retrying: malformed message, authentication rejection.
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

/// A fully rendered message ready for handoff to a transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Complete RFC822 payload, bodies and attachment included.
    pub mime: String,
}

/// Injected mail-delivery capability. The pipeline never talks SMTP itself;
/// it hands a rendered message to whatever transport was wired in.
pub trait MailTransport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    /// Reachability probe for the health surface, independent of the store.
    fn healthy(&self) -> bool;
}

/// Spools rendered messages as .eml files into an outbox directory, for
/// running without SMTP credentials; a relay picks the directory up.
pub struct FileSpoolTransport {
    dir: PathBuf,
}

impl FileSpoolTransport {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create outbox directory: {}", dir.display()))?;
        Ok(FileSpoolTransport { dir })
    }
}

impl MailTransport for FileSpoolTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let filename = format!("{}.eml", Uuid::new_v4());
        let path = self.dir.join(&filename);
        std::fs::write(&path, &message.mime)
            .map_err(|e| TransportError::Transient(format!("outbox write failed: {e}")))?;
        log::debug!("spooled message for {} to {}", message.to, path.display());
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.dir.is_dir()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Scripted transport for tests: pops one outcome per send and records
    /// every message it saw.
    pub struct ScriptedTransport {
        outcomes: Mutex<Vec<Result<(), TransportError>>>,
        pub sent: Mutex<Vec<OutboundMessage>>,
        healthy: AtomicBool,
    }

    impl ScriptedTransport {
        /// `outcomes` are consumed front to back; once exhausted every send
        /// succeeds.
        pub fn new(outcomes: Vec<Result<(), TransportError>>) -> Self {
            ScriptedTransport {
                outcomes: Mutex::new(outcomes),
                sent: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        pub fn send_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    impl MailTransport for ScriptedTransport {
        fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.clone());
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        }

        fn healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_spool_writes_eml() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileSpoolTransport::new(dir.path()).unwrap();
        assert!(transport.healthy());

        let message = OutboundMessage {
            from: "cv@example.com".to_string(),
            to: "jane@b.com".to_string(),
            subject: "Your CV".to_string(),
            mime: "From: cv@example.com\r\n\r\nhello".to_string(),
        };
        transport.send(&message).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().ends_with(".eml"));
    }
}

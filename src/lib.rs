pub mod admin;
pub mod config;
pub mod consent;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod spam;
pub mod store;
pub mod template;
pub mod transport;
pub mod validator;

pub use config::Config;
pub use error::{FieldViolation, PipelineError};
pub use pipeline::{IntakeResponse, Pipeline, RequestStatus};
pub use store::{Lead, LeadSource, LeadStatus, LeadStore};
pub use validator::{Submission, Validator};

use crate::admin::{AdminApi, AdminError};
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::store::{EmailType, LeadFilter, LeadStatus, Origin, Page};
use crate::validator::Submission;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

/// One request per line, newline-delimited JSON over a Unix socket. This is
/// the deployment shell around the pipeline; a reverse proxy or edge
/// function translates HTTP into these frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Intake {
        submission: Submission,
        #[serde(default)]
        origin: Origin,
    },
    Status {
        id: Uuid,
    },
    Export {
        id: Uuid,
    },
    Withdraw {
        id: Uuid,
    },
    Erase {
        id: Uuid,
    },
    Health,
    AdminList {
        token: String,
        #[serde(default)]
        filter: LeadFilter,
        #[serde(default)]
        page: Page,
    },
    AdminGet {
        token: String,
        id: Uuid,
    },
    AdminUpdateStatus {
        token: String,
        id: Uuid,
        status: LeadStatus,
        notes: Option<String>,
    },
    AdminDelete {
        token: String,
        id: Uuid,
    },
    AdminRedispatch {
        token: String,
        id: Uuid,
        email_type: EmailType,
    },
}

pub struct Server {
    pipeline: Arc<Pipeline>,
    admin: Arc<AdminApi>,
}

impl Server {
    pub fn new(pipeline: Arc<Pipeline>, admin: Arc<AdminApi>) -> Self {
        Server { pipeline, admin }
    }

    pub async fn run(&self, socket_path: &str) -> anyhow::Result<()> {
        // Remove a stale socket from a previous run
        if std::path::Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        log::info!("listening on {socket_path}");

        loop {
            let (stream, _) = listener.accept().await?;
            let pipeline = self.pipeline.clone();
            let admin = self.admin.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, pipeline, admin).await {
                    log::debug!("connection closed: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    pipeline: Arc<Pipeline>,
    admin: Arc<AdminApi>,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch_request(request, &pipeline, &admin),
            Err(e) => json!({
                "success": false,
                "error": { "code": "bad_request", "message": format!("malformed request: {e}") }
            }),
        };
        let mut frame = response.to_string();
        frame.push('\n');
        write_half.write_all(frame.as_bytes()).await?;
    }
    Ok(())
}

fn dispatch_request(request: Request, pipeline: &Pipeline, admin: &AdminApi) -> Value {
    match request {
        Request::Intake { submission, origin } => {
            match pipeline.handle_intake(&submission, &origin) {
                Ok(response) => to_value(&response),
                Err(e) => pipeline_error(&e),
            }
        }
        Request::Status { id } => match pipeline.request_status(id) {
            Ok(status) => json!({ "success": true, "request": to_value(&status) }),
            Err(e) => pipeline_error(&e),
        },
        Request::Export { id } => match pipeline.ledger().export(id) {
            Ok(record) => json!({ "success": true, "export": record }),
            Err(e) => pipeline_error(&e),
        },
        Request::Withdraw { id } => {
            match pipeline.ledger().withdraw(id, pipeline.clock().now()) {
                Ok(()) => json!({ "success": true }),
                Err(e) => pipeline_error(&e),
            }
        }
        Request::Erase { id } => match pipeline.ledger().erase(id, pipeline.clock().now()) {
            Ok(()) => json!({ "success": true }),
            Err(e) => pipeline_error(&e),
        },
        Request::Health => {
            let health = pipeline.health();
            json!({ "success": true, "health": to_value(&health) })
        }
        Request::AdminList {
            token,
            filter,
            page,
        } => match admin.list_leads(&token, &filter, &page) {
            Ok(page) => json!({ "success": true, "leads": to_value(&page) }),
            Err(e) => admin_error(&e),
        },
        Request::AdminGet { token, id } => match admin.get_lead(&token, id) {
            Ok(lead) => json!({ "success": true, "lead": to_value(&lead) }),
            Err(e) => admin_error(&e),
        },
        Request::AdminUpdateStatus {
            token,
            id,
            status,
            notes,
        } => match admin.update_status(&token, id, status, notes.as_deref()) {
            Ok(lead) => json!({ "success": true, "lead": to_value(&lead) }),
            Err(e) => admin_error(&e),
        },
        Request::AdminDelete { token, id } => match admin.delete_lead(&token, id) {
            Ok(()) => json!({ "success": true }),
            Err(e) => admin_error(&e),
        },
        Request::AdminRedispatch {
            token,
            id,
            email_type,
        } => match admin
            .authenticate(&token)
            .and_then(|_| pipeline.redispatch(id, email_type).map_err(AdminError::from))
        {
            Ok(row) => json!({ "success": true, "email": to_value(&row) }),
            Err(e) => admin_error(&e),
        },
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Field-level detail goes out for validation; everything else is a code
/// plus message so internal detail never leaks to the public surface.
fn pipeline_error(error: &PipelineError) -> Value {
    let mut body = json!({
        "code": error.code(),
        "message": error.to_string(),
    });
    match error {
        PipelineError::Validation(violations) => {
            body["fields"] = to_value(violations);
        }
        PipelineError::RateLimited { retry_after } => {
            body["retry_after_seconds"] = json!(retry_after.as_secs());
        }
        PipelineError::StoreUnavailable(_) => {
            // 5xx-equivalent: log the cause, return only the code
            log::error!("store unavailable: {error}");
            body["message"] = json!("service temporarily unavailable");
        }
        _ => {}
    }
    json!({ "success": false, "error": body })
}

fn admin_error(error: &AdminError) -> Value {
    match error {
        AdminError::Denied => json!({
            "success": false,
            "error": { "code": "denied", "message": "authentication denied" }
        }),
        AdminError::Pipeline(e) => pipeline_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::StaticTokenAuthenticator;
    use crate::config::{AdminToken, Config};
    use crate::rate_limit::SystemClock;
    use crate::store::LeadStore;
    use crate::transport::testing::ScriptedTransport;

    fn build() -> (Arc<Pipeline>, Arc<AdminApi>) {
        let mut config = Config::default();
        config.email.cv_attachment_path = "/nonexistent/cv.pdf".to_string();
        config.dispatch.workers = 1;

        let store = Arc::new(LeadStore::open_in_memory(60).unwrap());
        let clock = Arc::new(SystemClock);
        let pipeline = Arc::new(Pipeline::new(
            &config,
            store.clone(),
            Arc::new(ScriptedTransport::new(vec![])),
            clock.clone(),
        ));
        let admin = Arc::new(AdminApi::new(
            store,
            Arc::new(StaticTokenAuthenticator::new(&[AdminToken {
                token: "secret".to_string(),
                subject: "ops".to_string(),
            }])),
            clock,
        ));
        (pipeline, admin)
    }

    fn parse(line: &str) -> Request {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_intake_frame_round_trip() {
        let (pipeline, admin) = build();
        let request = parse(
            r#"{"op":"intake","submission":{"name":"Jane Doe","email":"jane@b.com","phone":"5550102345","consent":true,"website":""},"origin":{"ip_address":"10.0.0.1"}}"#,
        );

        let response = dispatch_request(request, &pipeline, &admin);
        assert_eq!(response["success"], true);
        assert!(response["request_id"].is_string());

        pipeline.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validation_errors_carry_field_detail() {
        let (pipeline, admin) = build();
        let request = parse(
            r#"{"op":"intake","submission":{"name":"J","email":"nope","phone":"1","consent":true,"website":""}}"#,
        );

        let response = dispatch_request(request, &pipeline, &admin);
        assert_eq!(response["success"], false);
        assert_eq!(response["error"]["code"], "validation_error");
        assert_eq!(response["error"]["fields"].as_array().unwrap().len(), 3);

        pipeline.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_admin_frames_require_token() {
        let (pipeline, admin) = build();
        let denied = dispatch_request(
            parse(r#"{"op":"admin_list","token":"wrong"}"#),
            &pipeline,
            &admin,
        );
        assert_eq!(denied["error"]["code"], "denied");

        let allowed = dispatch_request(
            parse(r#"{"op":"admin_list","token":"secret"}"#),
            &pipeline,
            &admin,
        );
        assert_eq!(allowed["success"], true);

        let redispatch_denied = dispatch_request(
            parse(
                r#"{"op":"admin_redispatch","token":"wrong","id":"00000000-0000-0000-0000-000000000000","email_type":"cv_delivery"}"#,
            ),
            &pipeline,
            &admin,
        );
        assert_eq!(redispatch_denied["error"]["code"], "denied");

        pipeline.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_frame() {
        let (pipeline, admin) = build();
        let response = dispatch_request(parse(r#"{"op":"health"}"#), &pipeline, &admin);
        assert_eq!(response["health"]["status"], "healthy");
        pipeline.shutdown().await;
    }
}

use crate::config::EmailConfig;
use crate::store::Lead;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("attachment {path} is {size} bytes, cap is {cap}")]
    AttachmentTooLarge { path: String, size: u64, cap: u64 },
    #[error("failed to read attachment {path}: {source}")]
    AttachmentRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

/// Personalized CV-delivery message: name substitution, optional company
/// and purpose lines, scheduling/profile links from config, CV attached
/// when the configured file exists and fits the size cap.
pub fn render_cv_email(config: &EmailConfig, lead: &Lead) -> Result<RenderedEmail, RenderError> {
    let company_text = lead
        .company
        .as_deref()
        .map(|c| format!(" at {c}"))
        .unwrap_or_default();
    let purpose_text = lead
        .purpose
        .as_deref()
        .map(|p| format!("Your stated purpose: {p}\n\n"))
        .unwrap_or_default();

    let text_body = format!(
        "Dear {name},\n\n\
         Thank you for your interest{company_text}.\n\n\
         {purpose_text}\
         As requested, please find the CV attached.\n\n\
         Next steps:\n\
         - Book a call: {scheduling}\n\
         - Connect: {profile}\n\n\
         Best regards,\n{from_name}\n",
        name = lead.name,
        scheduling = config.scheduling_url,
        profile = config.profile_url,
        from_name = config.from_name,
    );

    let purpose_html = lead
        .purpose
        .as_deref()
        .map(|p| format!("<p><strong>Your stated purpose:</strong> {}</p>", escape_html(p)))
        .unwrap_or_default();
    let html_body = format!(
        "<html><body>\
         <h2>Dear {name},</h2>\
         <p>Thank you for your interest{company}.</p>\
         {purpose_html}\
         <p>As requested, please find the CV attached.</p>\
         <p><a href=\"{scheduling}\">Book a call</a> &middot; \
         <a href=\"{profile}\">Connect</a></p>\
         <p>Best regards,<br><strong>{from_name}</strong></p>\
         </body></html>",
        name = escape_html(&lead.name),
        company = escape_html(&company_text),
        scheduling = config.scheduling_url,
        profile = config.profile_url,
        from_name = escape_html(&config.from_name),
    );

    Ok(RenderedEmail {
        subject: config.cv_subject.clone(),
        text_body,
        html_body,
        attachment: load_cv_attachment(config)?,
    })
}

/// Heads-up to the admin inbox for every new lead. No attachment.
pub fn render_admin_notification(lead: &Lead) -> RenderedEmail {
    let subject = format!(
        "New CV request: {} ({})",
        lead.name,
        lead.company.as_deref().unwrap_or("no company")
    );
    let text_body = format!(
        "New CV request received\n\n\
         Name: {}\nEmail: {}\nPhone: {}\nCompany: {}\nRole: {}\nPurpose: {}\n\
         IP: {}\nReceived: {}\n",
        lead.name,
        lead.email,
        lead.phone,
        lead.company.as_deref().unwrap_or("-"),
        lead.role.as_deref().unwrap_or("-"),
        lead.purpose.as_deref().unwrap_or("-"),
        lead.ip_address.as_deref().unwrap_or("unknown"),
        lead.created_at.to_rfc3339(),
    );
    let html_body = format!(
        "<html><body><h2>New CV request</h2><pre>{}</pre></body></html>",
        escape_html(&text_body)
    );

    RenderedEmail {
        subject,
        text_body,
        html_body,
        attachment: None,
    }
}

fn load_cv_attachment(config: &EmailConfig) -> Result<Option<Attachment>, RenderError> {
    let path = Path::new(&config.cv_attachment_path);
    if !path.exists() {
        log::warn!(
            "CV attachment missing at {}, sending without attachment",
            config.cv_attachment_path
        );
        return Ok(None);
    }

    let data = std::fs::read(path).map_err(|source| RenderError::AttachmentRead {
        path: config.cv_attachment_path.clone(),
        source,
    })?;
    if data.len() as u64 > config.max_attachment_bytes {
        return Err(RenderError::AttachmentTooLarge {
            path: config.cv_attachment_path.clone(),
            size: data.len() as u64,
            cap: config.max_attachment_bytes,
        });
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cv.pdf".to_string());
    Ok(Some(Attachment {
        filename,
        content_type: "application/pdf".to_string(),
        data,
    }))
}

impl RenderedEmail {
    /// Assembles the RFC822 message: multipart/alternative for the bodies,
    /// wrapped in multipart/mixed when an attachment rides along.
    pub fn to_mime(&self, from: &str, to: &str, date: DateTime<Utc>) -> String {
        let alt_boundary = "cvgate-alt";
        let mixed_boundary = "cvgate-mixed";

        let alternative = format!(
            "--{b}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{text}\r\n\
             --{b}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html}\r\n\
             --{b}--\r\n",
            b = alt_boundary,
            text = self.text_body,
            html = self.html_body,
        );

        let mut message = format!(
            "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\nMIME-Version: 1.0\r\n",
            subject = self.subject,
            date = date.to_rfc2822(),
        );

        match &self.attachment {
            None => {
                message.push_str(&format!(
                    "Content-Type: multipart/alternative; boundary={alt_boundary}\r\n\r\n{alternative}"
                ));
            }
            Some(attachment) => {
                let encoded = wrap_base64(&BASE64.encode(&attachment.data));
                message.push_str(&format!(
                    "Content-Type: multipart/mixed; boundary={mixed_boundary}\r\n\r\n\
                     --{mixed_boundary}\r\n\
                     Content-Type: multipart/alternative; boundary={alt_boundary}\r\n\r\n\
                     {alternative}\
                     --{mixed_boundary}\r\n\
                     Content-Type: {ctype}\r\n\
                     Content-Transfer-Encoding: base64\r\n\
                     Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n\
                     {encoded}\r\n\
                     --{mixed_boundary}--\r\n",
                    ctype = attachment.content_type,
                    filename = attachment.filename,
                ));
            }
        }
        message
    }
}

fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LeadSource, LeadStatus};
    use chrono::TimeZone;
    use std::io::Write;
    use uuid::Uuid;

    fn lead() -> Lead {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        Lead {
            id: Uuid::new_v4(),
            name: "Jane Doe".to_string(),
            email: "jane@b.com".to_string(),
            phone: "5550102345".to_string(),
            company: Some("Tech Corp".to_string()),
            role: Some("CTO".to_string()),
            purpose: Some("AI consulting".to_string()),
            source: LeadSource::CvRequest,
            status: LeadStatus::New,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
            consent_given: true,
            consent_timestamp: Some(now),
            notes: None,
            erased_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn config_with_cv(dir: &tempfile::TempDir, bytes: usize) -> EmailConfig {
        let path = dir.path().join("cv.pdf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
        EmailConfig {
            cv_attachment_path: path.to_string_lossy().into_owned(),
            max_attachment_bytes: 1024,
            ..EmailConfig::default()
        }
    }

    #[test]
    fn test_cv_email_substitutes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = render_cv_email(&config_with_cv(&dir, 10), &lead()).unwrap();

        assert!(rendered.text_body.contains("Dear Jane Doe"));
        assert!(rendered.text_body.contains("at Tech Corp"));
        assert!(rendered.text_body.contains("AI consulting"));
        assert!(rendered.attachment.is_some());
    }

    #[test]
    fn test_missing_attachment_sends_without() {
        let config = EmailConfig {
            cv_attachment_path: "/nonexistent/cv.pdf".to_string(),
            ..EmailConfig::default()
        };
        let rendered = render_cv_email(&config, &lead()).unwrap();
        assert!(rendered.attachment.is_none());
    }

    #[test]
    fn test_oversized_attachment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_cv(&dir, 2048);

        match render_cv_email(&config, &lead()) {
            Err(RenderError::AttachmentTooLarge { size, cap, .. }) => {
                assert_eq!(size, 2048);
                assert_eq!(cap, 1024);
            }
            other => panic!("expected AttachmentTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_mime_assembly_with_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = render_cv_email(&config_with_cv(&dir, 10), &lead()).unwrap();
        let mime = rendered.to_mime(
            "cv@example.com",
            "jane@b.com",
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        );

        assert!(mime.contains("To: jane@b.com"));
        assert!(mime.contains("multipart/mixed"));
        assert!(mime.contains("Content-Transfer-Encoding: base64"));
        assert!(mime.contains("filename=\"cv.pdf\""));
    }

    #[test]
    fn test_html_body_escapes_user_input() {
        let mut lead = lead();
        lead.name = "Jane <script>".to_string();
        let config = EmailConfig {
            cv_attachment_path: "/nonexistent/cv.pdf".to_string(),
            ..EmailConfig::default()
        };
        let rendered = render_cv_email(&config, &lead).unwrap();
        assert!(rendered.html_body.contains("Jane &lt;script&gt;"));
        assert!(!rendered.html_body.contains("<script>"));
    }

    #[test]
    fn test_admin_notification_contains_lead_details() {
        let rendered = render_admin_notification(&lead());
        assert!(rendered.subject.contains("Jane Doe"));
        assert!(rendered.subject.contains("Tech Corp"));
        assert!(rendered.text_body.contains("jane@b.com"));
        assert!(rendered.attachment.is_none());
    }
}

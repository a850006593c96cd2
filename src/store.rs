use crate::error::PipelineError;
use crate::validator::LeadPayload;
use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const REDACTED_WITHDRAWN: &str = "[withdrawn]";
pub const REDACTED_ERASED: &str = "[erased]";
pub const REDACTED_RECIPIENT: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    ProposalSent,
    ClosedWon,
    ClosedLost,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::ProposalSent => "proposal_sent",
            LeadStatus::ClosedWon => "closed_won",
            LeadStatus::ClosedLost => "closed_lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(LeadStatus::New),
            "contacted" => Some(LeadStatus::Contacted),
            "qualified" => Some(LeadStatus::Qualified),
            "proposal_sent" => Some(LeadStatus::ProposalSent),
            "closed_won" => Some(LeadStatus::ClosedWon),
            "closed_lost" => Some(LeadStatus::ClosedLost),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::ClosedWon | LeadStatus::ClosedLost)
    }

    /// Closed transition table. Forward movement goes through
    /// new -> contacted -> qualified -> proposal_sent -> closed_won;
    /// closed_lost is reachable from any non-terminal state as the
    /// administrative override. Terminal states have no exits.
    pub fn can_transition_to(self, to: LeadStatus) -> bool {
        use LeadStatus::*;
        if self.is_terminal() || self == to {
            return false;
        }
        if to == ClosedLost {
            return true;
        }
        matches!(
            (self, to),
            (New, Contacted) | (Contacted, Qualified) | (Qualified, ProposalSent)
                | (ProposalSent, ClosedWon)
        )
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    CvRequest,
    Calendly,
    Linkedin,
    Referral,
    Direct,
    Other,
}

impl LeadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadSource::CvRequest => "cv_request",
            LeadSource::Calendly => "calendly",
            LeadSource::Linkedin => "linkedin",
            LeadSource::Referral => "referral",
            LeadSource::Direct => "direct",
            LeadSource::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cv_request" => Some(LeadSource::CvRequest),
            "calendly" => Some(LeadSource::Calendly),
            "linkedin" => Some(LeadSource::Linkedin),
            "referral" => Some(LeadSource::Referral),
            "direct" => Some(LeadSource::Direct),
            "other" => Some(LeadSource::Other),
            _ => None,
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    CvDelivery,
    AdminNotification,
}

impl EmailType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailType::CvDelivery => "cv_delivery",
            EmailType::AdminNotification => "admin_notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cv_delivery" => Some(EmailType::CvDelivery),
            "admin_notification" => Some(EmailType::AdminNotification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Queued,
    Sent,
    Failed,
    Bounced,
}

impl EmailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Queued => "queued",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
            EmailStatus::Bounced => "bounced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(EmailStatus::Queued),
            "sent" => Some(EmailStatus::Sent),
            "failed" => Some(EmailStatus::Failed),
            "bounced" => Some(EmailStatus::Bounced),
        _ => None,
        }
    }
}

/// Origin metadata captured once at creation, never updated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: Option<String>,
    pub role: Option<String>,
    pub purpose: Option<String>,
    pub source: LeadSource,
    pub status: LeadStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub consent_given: bool,
    pub consent_timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub erased_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn is_erased(&self) -> bool {
        self.erased_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailLog {
    pub id: i64,
    pub lead_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub email_type: EmailType,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent create: `deduplicated` is true when an identical
/// submission inside the dedup window was absorbed into the existing lead.
#[derive(Debug, Clone)]
pub struct CreatedLead {
    pub lead: Lead,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub source: Option<LeadSource>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadPage {
    pub leads: Vec<Lead>,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

const LEAD_COLUMNS: &str = "id, name, email, phone, company, role, purpose, source, status, \
     ip_address, user_agent, consent_given, consent_timestamp, notes, erased_at, \
     created_at, updated_at";

/// Durable store for leads, email delivery history and analytics events.
/// A single connection behind a mutex gives every check-and-write an atomic
/// critical section, so duplicate-submission races cannot create two leads.
pub struct LeadStore {
    conn: Mutex<Connection>,
    dedup_window: Duration,
}

impl LeadStore {
    pub fn open(path: &str, dedup_window_seconds: u64) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open lead database: {path}"))?;
        Self::init_schema(&conn).context("failed to initialize lead schema")?;
        Ok(LeadStore {
            conn: Mutex::new(conn),
            dedup_window: Duration::seconds(dedup_window_seconds as i64),
        })
    }

    pub fn open_in_memory(dedup_window_seconds: u64) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(LeadStore {
            conn: Mutex::new(conn),
            dedup_window: Duration::seconds(dedup_window_seconds as i64),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS leads (
                 id TEXT PRIMARY KEY,
                 name TEXT NOT NULL,
                 email TEXT NOT NULL,
                 phone TEXT NOT NULL,
                 company TEXT,
                 role TEXT,
                 purpose TEXT,
                 source TEXT NOT NULL,
                 status TEXT NOT NULL,
                 ip_address TEXT,
                 user_agent TEXT,
                 consent_given INTEGER NOT NULL DEFAULT 0,
                 consent_timestamp TEXT,
                 notes TEXT,
                 erased_at TEXT,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(email);
             CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status);
             CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads(created_at);

             CREATE TABLE IF NOT EXISTS email_log (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                 recipient TEXT NOT NULL,
                 subject TEXT NOT NULL,
                 email_type TEXT NOT NULL,
                 status TEXT NOT NULL,
                 error TEXT,
                 attempts INTEGER NOT NULL DEFAULT 0,
                 sent_at TEXT,
                 updated_at TEXT NOT NULL,
                 UNIQUE(lead_id, email_type)
             );

             CREATE TABLE IF NOT EXISTS analytics_events (
                 id TEXT PRIMARY KEY,
                 event_type TEXT NOT NULL,
                 payload TEXT NOT NULL,
                 ip_address TEXT,
                 user_agent TEXT,
                 created_at TEXT NOT NULL
             );",
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persists a new lead in state `new`, or absorbs a literal duplicate
    /// (same email + purpose + source inside the dedup window) by returning
    /// the existing record. The lookup and insert share one lock so a
    /// client-side double-submit cannot slip two rows in.
    pub fn create(
        &self,
        payload: &LeadPayload,
        origin: &Origin,
        now: DateTime<Utc>,
    ) -> Result<CreatedLead, PipelineError> {
        let conn = self.conn();
        let cutoff = fmt_ts(now - self.dedup_window);

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM leads
                 WHERE email = ?1 AND IFNULL(purpose, '') = ?2 AND source = ?3
                   AND erased_at IS NULL AND created_at >= ?4
                 ORDER BY created_at DESC LIMIT 1",
                params![
                    payload.email,
                    payload.purpose.as_deref().unwrap_or(""),
                    payload.source.as_str(),
                    cutoff
                ],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            let lead = Self::get_locked(&conn, &id)?
                .ok_or_else(|| PipelineError::NotFound(parse_uuid_lossy(&id)))?;
            log::info!("duplicate submission absorbed into lead {}", lead.id);
            return Ok(CreatedLead {
                lead,
                deduplicated: true,
            });
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO leads (id, name, email, phone, company, role, purpose, source,
                 status, ip_address, user_agent, consent_given, consent_timestamp,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?13, ?13)",
            params![
                id.to_string(),
                payload.name,
                payload.email,
                payload.phone,
                payload.company,
                payload.role,
                payload.purpose,
                payload.source.as_str(),
                LeadStatus::New.as_str(),
                origin.ip_address,
                origin.user_agent,
                fmt_ts(now),
                fmt_ts(now),
            ],
        )?;

        let lead = Self::get_locked(&conn, &id.to_string())?
            .ok_or(PipelineError::NotFound(id))?;
        Ok(CreatedLead {
            lead,
            deduplicated: false,
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Lead>, PipelineError> {
        let conn = self.conn();
        Ok(Self::get_locked(&conn, &id.to_string())?)
    }

    fn get_locked(conn: &Connection, id: &str) -> rusqlite::Result<Option<Lead>> {
        conn.query_row(
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
            params![id],
            lead_from_row,
        )
        .optional()
    }

    /// Enforces the closed transition table; `notes` replaces the stored
    /// notes only when provided.
    pub fn update_status(
        &self,
        id: Uuid,
        new_status: LeadStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Lead, PipelineError> {
        let conn = self.conn();
        let lead =
            Self::get_locked(&conn, &id.to_string())?.ok_or(PipelineError::NotFound(id))?;

        if !lead.status.can_transition_to(new_status) {
            return Err(PipelineError::InvalidTransition {
                from: lead.status,
                to: new_status,
            });
        }

        conn.execute(
            "UPDATE leads SET status = ?1, notes = IFNULL(?2, notes), updated_at = ?3
             WHERE id = ?4",
            params![new_status.as_str(), notes, fmt_ts(now), id.to_string()],
        )?;

        Self::get_locked(&conn, &id.to_string())?.ok_or(PipelineError::NotFound(id))
    }

    pub fn list(&self, filter: &LeadFilter, page: &Page) -> Result<LeadPage, PipelineError> {
        let conn = self.conn();
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(source) = filter.source {
            clauses.push("source = ?");
            values.push(source.as_str().to_string());
        }
        if let Some(after) = filter.created_after {
            clauses.push("created_at >= ?");
            values.push(fmt_ts(after));
        }
        if let Some(before) = filter.created_before {
            clauses.push("created_at <= ?");
            values.push(fmt_ts(before));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM leads {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = page.limit.max(1);
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads {where_clause}
             ORDER BY created_at DESC LIMIT {limit} OFFSET {}",
            page.offset
        ))?;
        let leads = stmt
            .query_map(params_from_iter(values.iter()), lead_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LeadPage {
            leads,
            total,
            page: page.offset / limit + 1,
            pages: total.div_ceil(limit),
        })
    }

    /// Creates or resets the single EmailLog row for (lead, email_type) and
    /// marks it queued. Re-dispatch reuses the row instead of growing an
    /// unbounded history.
    pub fn enqueue_email(
        &self,
        lead_id: Uuid,
        recipient: &str,
        subject: &str,
        email_type: EmailType,
        now: DateTime<Utc>,
    ) -> Result<EmailLog, PipelineError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO email_log (lead_id, recipient, subject, email_type, status,
                 error, attempts, sent_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', NULL, 0, NULL, ?5)
             ON CONFLICT(lead_id, email_type) DO UPDATE SET
                 recipient = excluded.recipient,
                 subject = excluded.subject,
                 status = 'queued',
                 error = NULL,
                 attempts = 0,
                 sent_at = NULL,
                 updated_at = excluded.updated_at",
            params![
                lead_id.to_string(),
                recipient,
                subject,
                email_type.as_str(),
                fmt_ts(now)
            ],
        )?;
        Self::email_row_locked(&conn, lead_id, email_type)?
            .ok_or(PipelineError::NotFound(lead_id))
    }

    pub fn record_email_outcome(
        &self,
        lead_id: Uuid,
        email_type: EmailType,
        status: EmailStatus,
        error: Option<&str>,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let sent_at = (status == EmailStatus::Sent).then(|| fmt_ts(now));
        self.conn().execute(
            "UPDATE email_log SET status = ?1, error = ?2, attempts = ?3,
                 sent_at = ?4, updated_at = ?5
             WHERE lead_id = ?6 AND email_type = ?7",
            params![
                status.as_str(),
                error,
                attempts,
                sent_at,
                fmt_ts(now),
                lead_id.to_string(),
                email_type.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn email_log(&self, lead_id: Uuid) -> Result<Vec<EmailLog>, PipelineError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, lead_id, recipient, subject, email_type, status, error,
                 attempts, sent_at, updated_at
             FROM email_log WHERE lead_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![lead_id.to_string()], email_log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn email_row(
        &self,
        lead_id: Uuid,
        email_type: EmailType,
    ) -> Result<Option<EmailLog>, PipelineError> {
        let conn = self.conn();
        Ok(Self::email_row_locked(&conn, lead_id, email_type)?)
    }

    fn email_row_locked(
        conn: &Connection,
        lead_id: Uuid,
        email_type: EmailType,
    ) -> rusqlite::Result<Option<EmailLog>> {
        conn.query_row(
            "SELECT id, lead_id, recipient, subject, email_type, status, error,
                 attempts, sent_at, updated_at
             FROM email_log WHERE lead_id = ?1 AND email_type = ?2",
            params![lead_id.to_string(), email_type.as_str()],
            email_log_from_row,
        )
        .optional()
    }

    /// Write-once analytics event, consumed elsewhere by dashboards.
    pub fn record_event(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        origin: &Origin,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.conn().execute(
            "INSERT INTO analytics_events (id, event_type, payload, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                event_type,
                payload.to_string(),
                origin.ip_address,
                origin.user_agent,
                fmt_ts(now)
            ],
        )?;
        Ok(())
    }

    /// Consent withdrawal: clears the consent flag and scrubs direct PII,
    /// keeping only the hashed email for the audit trail. Returns false when
    /// the lead had already withdrawn or been erased (no-op).
    pub fn withdraw_consent(
        &self,
        id: Uuid,
        email_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PipelineError> {
        let conn = self.conn();
        let lead =
            Self::get_locked(&conn, &id.to_string())?.ok_or(PipelineError::NotFound(id))?;
        if lead.is_erased() || !lead.consent_given {
            return Ok(false);
        }

        conn.execute(
            "UPDATE leads SET consent_given = 0, name = ?1, phone = ?1, purpose = NULL,
                 email = ?2, updated_at = ?3
             WHERE id = ?4",
            params![REDACTED_WITHDRAWN, email_hash, fmt_ts(now), id.to_string()],
        )?;
        Ok(true)
    }

    /// Right-to-erasure: scrubs every PII field, keeps the anonymized stub
    /// (id, timestamps, status) so EmailLog history stays referentially
    /// intact, and redacts recipients on that history. Returns false when
    /// already erased.
    pub fn erase(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, PipelineError> {
        let mut conn = self.conn();
        let lead =
            Self::get_locked(&conn, &id.to_string())?.ok_or(PipelineError::NotFound(id))?;
        if lead.is_erased() {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE leads SET name = ?1, email = ?1, phone = ?1, company = NULL,
                 role = NULL, purpose = NULL, ip_address = NULL, user_agent = NULL,
                 notes = NULL, consent_given = 0, consent_timestamp = NULL,
                 erased_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![REDACTED_ERASED, fmt_ts(now), id.to_string()],
        )?;
        tx.execute(
            "UPDATE email_log SET recipient = ?1, updated_at = ?2 WHERE lead_id = ?3",
            params![REDACTED_RECIPIENT, fmt_ts(now), id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn healthy(&self) -> bool {
        self.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width form so string comparison in SQL follows time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_uuid_lossy(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

fn conversion_err(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected column value: {value}").into(),
    )
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    let id: String = row.get(0)?;
    let source: String = row.get(7)?;
    let status: String = row.get(8)?;
    let consent_timestamp: Option<String> = row.get(12)?;
    let erased_at: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Lead {
        id: Uuid::parse_str(&id).map_err(|_| conversion_err(0, &id))?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        company: row.get(4)?,
        role: row.get(5)?,
        purpose: row.get(6)?,
        source: LeadSource::parse(&source).ok_or_else(|| conversion_err(7, &source))?,
        status: LeadStatus::parse(&status).ok_or_else(|| conversion_err(8, &status))?,
        ip_address: row.get(9)?,
        user_agent: row.get(10)?,
        consent_given: row.get::<_, i64>(11)? != 0,
        consent_timestamp: consent_timestamp.as_deref().and_then(parse_ts),
        notes: row.get(13)?,
        erased_at: erased_at.as_deref().and_then(parse_ts),
        created_at: parse_ts(&created_at).ok_or_else(|| conversion_err(15, &created_at))?,
        updated_at: parse_ts(&updated_at).ok_or_else(|| conversion_err(16, &updated_at))?,
    })
}

fn email_log_from_row(row: &Row<'_>) -> rusqlite::Result<EmailLog> {
    let lead_id: String = row.get(1)?;
    let email_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let sent_at: Option<String> = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(EmailLog {
        id: row.get(0)?,
        lead_id: Uuid::parse_str(&lead_id).map_err(|_| conversion_err(1, &lead_id))?,
        recipient: row.get(2)?,
        subject: row.get(3)?,
        email_type: EmailType::parse(&email_type)
            .ok_or_else(|| conversion_err(4, &email_type))?,
        status: EmailStatus::parse(&status).ok_or_else(|| conversion_err(5, &status))?,
        error: row.get(6)?,
        attempts: row.get(7)?,
        sent_at: sent_at.as_deref().and_then(parse_ts),
        updated_at: parse_ts(&updated_at).ok_or_else(|| conversion_err(9, &updated_at))?,
    })
}

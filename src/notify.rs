//! Outbound SMS/email with a persistent delivery log.
//!
//! Delivery goes through a [`Notifier`] chosen from configuration. Every
//! attempt is logged in `notification_log`, first as PENDING, then SENT or
//! FAILED. Callers that notify as a side effect (payment receipts) treat a
//! failure as non-fatal.

use crate::config::NotifyBackend;
use crate::db::{now_ts, unknown_variant};
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerEntry;
use crate::students::Student;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SMS" => Some(Self::Sms),
            "EMAIL" => Some(Self::Email),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Sent,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

/// A message ready to hand to a backend.
#[derive(Debug, Clone)]
pub struct Outgoing<'a> {
    pub recipient: &'a str,
    pub channel: Channel,
    pub subject: Option<&'a str>,
    pub body: &'a str,
}

pub trait Notifier {
    fn name(&self) -> &'static str;
    fn deliver(&self, message: &Outgoing<'_>) -> Result<(), DeliveryError>;
}

/// Writes messages to the log instead of a gateway.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    fn deliver(&self, message: &Outgoing<'_>) -> Result<(), DeliveryError> {
        tracing::info!(
            channel = message.channel.as_str(),
            recipient = message.recipient,
            subject = message.subject.unwrap_or(""),
            body = message.body,
            "notification delivered to console"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn deliver(&self, _message: &Outgoing<'_>) -> Result<(), DeliveryError> {
        Err(DeliveryError("notifications are disabled".into()))
    }
}

pub fn notifier_for(backend: NotifyBackend) -> Box<dyn Notifier> {
    match backend {
        NotifyBackend::Console => Box::new(ConsoleNotifier),
        NotifyBackend::Disabled => Box::new(DisabledNotifier),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub recipient: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    pub status: Status,
    pub error_message: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

const RECORD_COLUMNS: &str =
    "id, recipient, channel, subject, body, status, error_message, created_at, sent_at";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let channel: String = r.get(2)?;
    let status: String = r.get(5)?;
    Ok(NotificationRecord {
        id: r.get(0)?,
        recipient: r.get(1)?,
        channel: Channel::parse(&channel).ok_or_else(|| unknown_variant(2, "channel", &channel))?,
        subject: r.get(3)?,
        body: r.get(4)?,
        status: Status::parse(&status).ok_or_else(|| unknown_variant(5, "status", &status))?,
        error_message: r.get(6)?,
        created_at: r.get(7)?,
        sent_at: r.get(8)?,
    })
}

/// Logs and attempts one message. Returns `None` when there is no recipient
/// to send to; nothing is logged in that case.
pub fn send(
    conn: &Connection,
    notifier: &dyn Notifier,
    recipient: &str,
    channel: Channel,
    subject: Option<&str>,
    body: &str,
) -> AppResult<Option<NotificationRecord>> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Ok(None);
    }
    if body.trim().is_empty() {
        return Err(AppError::validation("body must not be empty"));
    }
    let subject = subject.map(str::trim).filter(|s| !s.is_empty());

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notification_log(id, recipient, channel, subject, body, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'PENDING', ?)",
        (&id, recipient, channel.as_str(), subject, body, now_ts()),
    )?;

    let outcome = notifier.deliver(&Outgoing {
        recipient,
        channel,
        subject,
        body,
    });
    match outcome {
        Ok(()) => {
            conn.execute(
                "UPDATE notification_log SET status = 'SENT', sent_at = ? WHERE id = ?",
                (now_ts(), &id),
            )?;
        }
        Err(e) => {
            tracing::warn!(
                backend = notifier.name(),
                channel = channel.as_str(),
                recipient,
                error = %e,
                "notification delivery failed"
            );
            conn.execute(
                "UPDATE notification_log SET status = 'FAILED', error_message = ? WHERE id = ?",
                (e.to_string(), &id),
            )?;
        }
    }
    get(conn, &id)?.map(Some).ok_or_else(|| AppError::not_found("notification", id))
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Option<NotificationRecord>> {
    let sql = format!("SELECT {} FROM notification_log WHERE id = ?", RECORD_COLUMNS);
    Ok(conn.query_row(&sql, [id], record_from_row).optional()?)
}

pub fn list(
    conn: &Connection,
    status: Option<Status>,
    limit: Option<usize>,
) -> AppResult<Vec<NotificationRecord>> {
    let limit = limit.unwrap_or(100).clamp(1, 500) as i64;
    let sql = format!(
        "SELECT {} FROM notification_log
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((status.map(Status::as_str), limit), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn payment_receipt_text(school_name: &str, student: &Student, entry: &LedgerEntry) -> String {
    format!(
        "{}: received {} for {} ({}). Ref {}. Balance: {}.",
        school_name,
        entry.amount,
        student.full_name(),
        student.admission_number,
        entry.reference,
        student.balance
    )
}

/// Best-effort receipt SMS to the parent phone on file. Errors are logged,
/// never returned.
pub fn send_payment_receipt(
    conn: &Connection,
    notifier: &dyn Notifier,
    school_name: &str,
    student: &Student,
    entry: &LedgerEntry,
) -> Option<NotificationRecord> {
    let body = payment_receipt_text(school_name, student, entry);
    match send(conn, notifier, &student.parent_phone, Channel::Sms, None, &body) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(student_id = %student.id, error = %e, "receipt notification not logged");
            None
        }
    }
}

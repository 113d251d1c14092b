//! Billing engine: invoices generated from fee schedules, payments and
//! waivers, and the cached per-student balance derived from them.
//!
//! Every write recomputes the affected balance from the full entry set
//! inside the same transaction, so `students.balance_cents` always equals
//! `sum(INVOICE) - sum(PAYMENT + WAIVER)` for committed data.
//!
//! A failure anywhere in a batch (`apply_fee_schedule`, `bulk_invoice_term`)
//! rolls back every invoice that batch created.

use crate::db::{now_ts, unknown_variant};
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::fees::{self, FeeSchedule};
use crate::money::Money;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_REFERENCE_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Invoice,
    Payment,
    Waiver,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "INVOICE",
            Self::Payment => "PAYMENT",
            Self::Waiver => "WAIVER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INVOICE" => Some(Self::Invoice),
            "PAYMENT" => Some(Self::Payment),
            "WAIVER" => Some(Self::Waiver),
            _ => None,
        }
    }

    fn reference_prefix(self) -> &'static str {
        match self {
            Self::Invoice => "INV",
            Self::Payment => "PAY",
            Self::Waiver => "WVR",
        }
    }

    fn default_description(self) -> &'static str {
        match self {
            Self::Invoice => "Invoice",
            Self::Payment => "School Fees Payment",
            Self::Waiver => "Fee Waiver",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub student_id: String,
    pub kind: EntryKind,
    pub amount: Money,
    pub description: String,
    pub reference: String,
    pub fee_schedule_id: Option<String>,
    pub posted_at: String,
    pub viewed: bool,
}

/// A payment or waiver to post against one student.
#[derive(Debug, Clone)]
pub struct Credit {
    pub student_id: String,
    pub amount: Money,
    pub description: Option<String>,
    pub reference: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`; defaults to now.
    pub posted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub fee_schedule_id: String,
    pub description: String,
    pub amount: Money,
    pub created: usize,
    pub skipped: usize,
    pub invoiced_student_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub term_id: String,
    pub term_name: String,
    pub created: usize,
    pub skipped: usize,
    pub schedules: Vec<ApplyOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub students: usize,
    pub corrected: usize,
}

const ENTRY_COLUMNS: &str =
    "id, student_id, kind, amount_cents, description, reference, fee_schedule_id, posted_at, viewed";

fn entry_from_row(r: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let kind: String = r.get(2)?;
    Ok(LedgerEntry {
        id: r.get(0)?,
        student_id: r.get(1)?,
        kind: EntryKind::parse(&kind).ok_or_else(|| unknown_variant(2, "entry kind", &kind))?,
        amount: Money::from_cents(r.get(3)?),
        description: r.get(4)?,
        reference: r.get(5)?,
        fee_schedule_id: r.get(6)?,
        posted_at: r.get(7)?,
        viewed: r.get::<_, i64>(8)? != 0,
    })
}

/// Deterministic reference of the invoice a schedule produces for a
/// student. Applying the same schedule twice yields the same key, which the
/// UNIQUE constraint then refuses.
pub fn invoice_reference(term_name: &str, student_id: &str, schedule_id: &str) -> String {
    format!("INV-{}-{}-{}", term_name, student_id, schedule_id)
}

fn generated_reference(kind: EntryKind) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", kind.reference_prefix(), stamp, &salt[..8])
}

fn normalize_posted_at(value: Option<&str>) -> AppResult<String> {
    let Some(v) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now_ts());
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Ok(dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true));
        }
    }
    Err(AppError::validation(
        "postedAt must be an RFC 3339 timestamp or YYYY-MM-DD",
    ))
}

fn ensure_student(conn: &Connection, student_id: &str) -> AppResult<()> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("student", student_id));
    }
    Ok(())
}

/// Sum of the student's ledger, computed from every entry.
#[cfg(test)]
pub fn ledger_balance(conn: &Connection, student_id: &str) -> AppResult<Money> {
    let cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN kind = 'INVOICE' THEN amount_cents ELSE -amount_cents END), 0)
         FROM ledger_entries
         WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(Money::from_cents(cents))
}

/// Rewrites the cached balance from the full entry set. Call inside the
/// transaction of the ledger write that triggered it.
pub fn recompute_balance(conn: &Connection, student_id: &str) -> AppResult<Money> {
    let changed = conn.execute(
        "UPDATE students SET balance_cents = (
            SELECT COALESCE(SUM(CASE WHEN kind = 'INVOICE' THEN amount_cents ELSE -amount_cents END), 0)
            FROM ledger_entries
            WHERE student_id = ?1
         )
         WHERE id = ?1",
        [student_id],
    )?;
    if changed == 0 {
        return Err(AppError::not_found("student", student_id));
    }
    let cents: i64 = conn.query_row(
        "SELECT balance_cents FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(Money::from_cents(cents))
}

/// Repair pass: recomputes every cached balance and reports how many were
/// out of step with the ledger.
pub fn recompute_all_balances(conn: &Connection) -> AppResult<RepairOutcome> {
    let tx = conn.unchecked_transaction()?;
    let rows = {
        let mut stmt = tx.prepare(
            "SELECT s.id, s.balance_cents,
               COALESCE((SELECT SUM(CASE WHEN e.kind = 'INVOICE' THEN e.amount_cents ELSE -e.amount_cents END)
                         FROM ledger_entries e WHERE e.student_id = s.id), 0)
             FROM students s",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut corrected = 0;
    for (id, cached, actual) in &rows {
        if cached != actual {
            tracing::warn!(student_id = %id, cached, actual, "balance drift corrected");
            tx.execute(
                "UPDATE students SET balance_cents = ? WHERE id = ?",
                (actual, id),
            )?;
            corrected += 1;
        }
    }
    tx.commit()?;
    Ok(RepairOutcome {
        students: rows.len(),
        corrected,
    })
}

/// Invoices the students of `schedule`'s class. With `targets`, only those
/// students are invoiced and each must belong to the class.
pub fn apply_fee_schedule(
    conn: &Connection,
    schedule_id: &str,
    targets: Option<&[String]>,
) -> AppResult<ApplyOutcome> {
    let schedule = fees::get_fee_schedule(conn, schedule_id)?;
    let tx = conn.unchecked_transaction()?;
    let outcome = apply_schedule_tx(&tx, &schedule, targets)?;
    tx.commit()?;
    tracing::info!(
        fee_schedule_id = %schedule.id,
        created = outcome.created,
        skipped = outcome.skipped,
        "fee schedule applied"
    );
    Ok(outcome)
}

fn class_members(conn: &Connection, class_id: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM students WHERE class_id = ? ORDER BY rowid")?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn apply_schedule_tx(
    conn: &Connection,
    schedule: &FeeSchedule,
    targets: Option<&[String]>,
) -> AppResult<ApplyOutcome> {
    let members = class_members(conn, &schedule.class_id)?;
    let students: Vec<String> = match targets {
        None => members,
        Some(wanted) => {
            let in_class: HashSet<&str> = members.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut picked = Vec::new();
            for sid in wanted {
                if !in_class.contains(sid.as_str()) {
                    return Err(AppError::validation(format!(
                        "student {} is not in class {}",
                        sid, schedule.class_name
                    )));
                }
                if seen.insert(sid.as_str()) {
                    picked.push(sid.clone());
                }
            }
            picked
        }
    };

    let mut outcome = ApplyOutcome {
        fee_schedule_id: schedule.id.clone(),
        description: schedule.description.clone(),
        amount: schedule.amount,
        created: 0,
        skipped: 0,
        invoiced_student_ids: Vec::new(),
    };
    let posted_at = now_ts();
    let mut insert = conn.prepare(
        "INSERT INTO ledger_entries(
            id, student_id, kind, amount_cents, description, reference, fee_schedule_id, posted_at, viewed
         ) VALUES(?, ?, 'INVOICE', ?, ?, ?, ?, ?, 0)
         ON CONFLICT(reference) DO NOTHING",
    )?;
    for sid in students {
        let reference = invoice_reference(&schedule.term_name, &sid, &schedule.id);
        let inserted = insert.execute((
            Uuid::new_v4().to_string(),
            &sid,
            schedule.amount.cents(),
            &schedule.description,
            &reference,
            &schedule.id,
            &posted_at,
        ))?;
        if inserted == 0 {
            tracing::debug!(student_id = %sid, %reference, "already invoiced; skipped");
            outcome.skipped += 1;
            continue;
        }
        recompute_balance(conn, &sid)?;
        outcome.created += 1;
        outcome.invoiced_student_ids.push(sid);
    }
    Ok(outcome)
}

/// Applies every fee schedule of a term (the current term when `term_id` is
/// `None`) in a single transaction.
pub fn bulk_invoice_term(conn: &Connection, term_id: Option<&str>) -> AppResult<BulkOutcome> {
    let term = match term_id {
        Some(id) => crate::academic::get_term(conn, id)?,
        None => crate::academic::current_term(conn)?
            .ok_or_else(|| AppError::validation("no current term is set"))?,
    };
    let schedules = fees::list_fee_schedules(conn, Some(term.id.as_str()), None)?;

    let tx = conn.unchecked_transaction()?;
    let mut outcome = BulkOutcome {
        term_id: term.id.clone(),
        term_name: term.name.clone(),
        created: 0,
        skipped: 0,
        schedules: Vec::with_capacity(schedules.len()),
    };
    for schedule in &schedules {
        let applied = apply_schedule_tx(&tx, schedule, None)?;
        outcome.created += applied.created;
        outcome.skipped += applied.skipped;
        outcome.schedules.push(applied);
    }
    tx.commit()?;
    tracing::info!(
        term_id = %term.id,
        schedules = outcome.schedules.len(),
        created = outcome.created,
        skipped = outcome.skipped,
        "term invoiced"
    );
    Ok(outcome)
}

pub fn record_payment(conn: &Connection, credit: &Credit) -> AppResult<LedgerEntry> {
    record_credit(conn, EntryKind::Payment, credit)
}

/// A waiver is the compensating entry for an invoice that should not stand.
pub fn record_waiver(conn: &Connection, credit: &Credit) -> AppResult<LedgerEntry> {
    record_credit(conn, EntryKind::Waiver, credit)
}

fn record_credit(conn: &Connection, kind: EntryKind, credit: &Credit) -> AppResult<LedgerEntry> {
    if !credit.amount.is_positive() {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    let description = credit
        .description
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(kind.default_description())
        .to_string();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::validation(format!(
            "description length must be <= {}",
            MAX_DESCRIPTION_LEN
        )));
    }
    let reference = match credit.reference.as_deref().map(str::trim) {
        Some(r) if !r.is_empty() => {
            if r.chars().count() > MAX_REFERENCE_LEN {
                return Err(AppError::validation(format!(
                    "reference length must be <= {}",
                    MAX_REFERENCE_LEN
                )));
            }
            r.to_string()
        }
        _ => generated_reference(kind),
    };
    let posted_at = normalize_posted_at(credit.posted_at.as_deref())?;

    let tx = conn.unchecked_transaction()?;
    ensure_student(&tx, &credit.student_id)?;
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO ledger_entries(
            id, student_id, kind, amount_cents, description, reference, fee_schedule_id, posted_at, viewed
         ) VALUES(?, ?, ?, ?, ?, ?, NULL, ?, 0)",
        (
            &id,
            &credit.student_id,
            kind.as_str(),
            credit.amount.cents(),
            &description,
            &reference,
            &posted_at,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::DuplicateReference(reference.clone())
        } else {
            AppError::from(e)
        }
    })?;
    let balance = recompute_balance(&tx, &credit.student_id)?;
    tx.commit()?;
    tracing::info!(
        student_id = %credit.student_id,
        kind = kind.as_str(),
        amount = %credit.amount,
        %balance,
        "credit recorded"
    );
    get_entry(conn, &id)
}

/// Flags the student's unseen invoices as viewed. Balance is untouched.
pub fn mark_invoices_viewed(conn: &Connection, student_id: &str) -> AppResult<usize> {
    ensure_student(conn, student_id)?;
    let n = conn.execute(
        "UPDATE ledger_entries SET viewed = 1
         WHERE student_id = ? AND kind = 'INVOICE' AND viewed = 0",
        [student_id],
    )?;
    Ok(n)
}

pub fn get_entry(conn: &Connection, id: &str) -> AppResult<LedgerEntry> {
    let sql = format!("SELECT {} FROM ledger_entries WHERE id = ?", ENTRY_COLUMNS);
    conn.query_row(&sql, [id], entry_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("ledger entry", id))
}

/// The student's ledger, newest first.
pub fn list_entries(conn: &Connection, student_id: &str) -> AppResult<Vec<LedgerEntry>> {
    ensure_student(conn, student_id)?;
    let sql = format!(
        "SELECT {} FROM ledger_entries WHERE student_id = ? ORDER BY posted_at DESC, rowid DESC",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn unseen_invoice_count(conn: &Connection, student_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM ledger_entries WHERE student_id = ? AND kind = 'INVOICE' AND viewed = 0",
        [student_id],
        |r| r.get(0),
    )?)
}

//! Read-only finance views: defaulters, collections, the bursar dashboard,
//! statements and receipts.

use crate::error::{AppError, AppResult};
use crate::ledger::{self, EntryKind, LedgerEntry};
use crate::money::Money;
use crate::students::{self, Student};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

const RECENT_PAYMENTS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaulterRow {
    pub student_id: String,
    pub admission_number: String,
    pub name: String,
    pub class_name: Option<String>,
    pub parent_phone: String,
    pub balance: Money,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultersReport {
    pub min_amount: Option<Money>,
    pub count: usize,
    pub total_outstanding: Money,
    pub students: Vec<DefaulterRow>,
}

/// Students who owe money, largest debt first.
pub fn defaulters(
    conn: &Connection,
    min_amount: Option<Money>,
    class_id: Option<&str>,
) -> AppResult<DefaultersReport> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.admission_number, s.first_name || ' ' || s.last_name, c.name,
                s.parent_phone, s.balance_cents
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE s.balance_cents > 0
           AND (?1 IS NULL OR s.balance_cents >= ?1)
           AND (?2 IS NULL OR s.class_id = ?2)
         ORDER BY s.balance_cents DESC, s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map((min_amount.map(Money::cents), class_id), |r| {
            Ok(DefaulterRow {
                student_id: r.get(0)?,
                admission_number: r.get(1)?,
                name: r.get(2)?,
                class_name: r.get(3)?,
                parent_phone: r.get(4)?,
                balance: Money::from_cents(r.get(5)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DefaultersReport {
        min_amount,
        count: rows.len(),
        total_outstanding: rows.iter().map(|r| r.balance).sum(),
        students: rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    pub entry_id: String,
    pub student_id: String,
    pub student_name: String,
    pub admission_number: String,
    pub amount: Money,
    pub reference: String,
    pub description: String,
    pub posted_at: String,
}

const PAYMENT_SELECT: &str = "SELECT e.id, e.student_id, s.first_name || ' ' || s.last_name,
       s.admission_number, e.amount_cents, e.reference, e.description, e.posted_at
     FROM ledger_entries e
     JOIN students s ON s.id = e.student_id
     WHERE e.kind = 'PAYMENT'";

fn payment_from_row(r: &Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        entry_id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        admission_number: r.get(3)?,
        amount: Money::from_cents(r.get(4)?),
        reference: r.get(5)?,
        description: r.get(6)?,
        posted_at: r.get(7)?,
    })
}

fn payments_on(conn: &Connection, date: NaiveDate) -> AppResult<Vec<PaymentRow>> {
    let sql = format!(
        "{} AND substr(e.posted_at, 1, 10) = ? ORDER BY e.posted_at DESC, e.rowid DESC",
        PAYMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([date.format("%Y-%m-%d").to_string()], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCollection {
    pub date: String,
    pub count: usize,
    pub total: Money,
    pub payments: Vec<PaymentRow>,
}

/// Payments posted on `date` (UTC), today when not given.
pub fn daily_collection(conn: &Connection, date: Option<NaiveDate>) -> AppResult<DailyCollection> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let payments = payments_on(conn, date)?;
    Ok(DailyCollection {
        date: date.format("%Y-%m-%d").to_string(),
        count: payments.len(),
        total: payments.iter().map(|p| p.amount).sum(),
        payments,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BursarDashboard {
    pub date: String,
    pub today_total: Money,
    pub today_count: usize,
    pub outstanding_total: Money,
    pub defaulter_count: i64,
    pub recent_payments: Vec<PaymentRow>,
}

pub fn bursar_dashboard(conn: &Connection) -> AppResult<BursarDashboard> {
    let today = daily_collection(conn, None)?;
    let (defaulter_count, outstanding): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(balance_cents), 0) FROM students WHERE balance_cents > 0",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let sql = format!(
        "{} ORDER BY e.posted_at DESC, e.rowid DESC LIMIT ?",
        PAYMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let recent = stmt
        .query_map([RECENT_PAYMENTS], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BursarDashboard {
        date: today.date,
        today_total: today.total,
        today_count: today.count,
        outstanding_total: Money::from_cents(outstanding),
        defaulter_count,
        recent_payments: recent,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementTotals {
    pub invoiced: Money,
    pub paid: Money,
    pub waived: Money,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub student: Student,
    pub balance: Money,
    pub totals: StatementTotals,
    pub unseen_invoices: i64,
    pub entries: Vec<LedgerEntry>,
}

/// A student's account: every entry, newest first, with per-kind totals.
pub fn statement(conn: &Connection, student_id: &str) -> AppResult<Statement> {
    let student = students::get_student(conn, student_id)?;
    let entries = ledger::list_entries(conn, student_id)?;
    let mut totals = StatementTotals::default();
    for e in &entries {
        match e.kind {
            EntryKind::Invoice => totals.invoiced = totals.invoiced + e.amount,
            EntryKind::Payment => totals.paid = totals.paid + e.amount,
            EntryKind::Waiver => totals.waived = totals.waived + e.amount,
        }
    }
    Ok(Statement {
        balance: student.balance,
        unseen_invoices: ledger::unseen_invoice_count(conn, student_id)?,
        student,
        totals,
        entries,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub school_name: String,
    pub receipt_number: String,
    pub kind: EntryKind,
    pub student_id: String,
    pub student: String,
    pub class_name: Option<String>,
    pub amount: Money,
    pub description: String,
    pub posted_at: String,
    /// Balance immediately after this entry was posted.
    pub balance_after: Money,
    pub current_balance: Money,
}

pub fn receipt(conn: &Connection, school_name: &str, entry_id: &str) -> AppResult<Receipt> {
    let entry = ledger::get_entry(conn, entry_id)?;
    if entry.kind == EntryKind::Invoice {
        return Err(AppError::validation(
            "receipts are only issued for payments and waivers",
        ));
    }
    let student = students::get_student(conn, &entry.student_id)?;
    let balance_after: Option<i64> = conn
        .query_row(
            "SELECT COALESCE(SUM(CASE WHEN kind = 'INVOICE' THEN amount_cents ELSE -amount_cents END), 0)
             FROM ledger_entries
             WHERE student_id = ?1
               AND rowid <= (SELECT rowid FROM ledger_entries WHERE id = ?2)",
            (&entry.student_id, &entry.id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(Receipt {
        school_name: school_name.to_string(),
        receipt_number: entry.reference.clone(),
        kind: entry.kind,
        student_id: student.id.clone(),
        student: student.display(),
        class_name: student.class_name.clone(),
        amount: entry.amount,
        description: entry.description,
        posted_at: entry.posted_at,
        balance_after: Money::from_cents(balance_after.unwrap_or(0)),
        current_balance: student.balance,
    })
}

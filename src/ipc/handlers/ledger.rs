use crate::access::Permission;
use crate::audit::{AuditAction, Target};
use crate::error::AppResult;
use crate::ipc::helpers::{
    authorize, optional_str, optional_str_list, record_audit, required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Credit, EntryKind};
use crate::money::Money;
use crate::notify;
use crate::students;
use serde_json::json;

fn parse_credit(params: &serde_json::Value) -> AppResult<Credit> {
    Ok(Credit {
        student_id: required_str(params, "studentId")?,
        amount: Money::positive_from_json(params.get("amount").unwrap_or(&serde_json::Value::Null))?,
        description: optional_str(params, "description")?,
        reference: optional_str(params, "reference")?,
        posted_at: optional_str(params, "postedAt")?,
    })
}

fn handle_apply_fee_schedule(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageFinance)?;
    let schedule_id = required_str(&req.params, "feeScheduleId")?;
    let targets = optional_str_list(&req.params, "studentIds")?;
    let outcome = ledger::apply_fee_schedule(conn, &schedule_id, targets.as_deref())?;
    if outcome.created > 0 {
        record_audit(
            conn,
            &actor,
            AuditAction::Invoice,
            Target::new("fee_schedule", &outcome.fee_schedule_id, &outcome.description),
            json!({ "created": outcome.created, "skipped": outcome.skipped, "amount": outcome.amount }),
            req,
        );
    }
    to_json(&outcome)
}

fn handle_bulk_invoice_term(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageFinance)?;
    let term_id = optional_str(&req.params, "termId")?;
    let outcome = ledger::bulk_invoice_term(conn, term_id.as_deref())?;
    if outcome.created > 0 {
        record_audit(
            conn,
            &actor,
            AuditAction::Invoice,
            Target::new("term", &outcome.term_id, &outcome.term_name),
            json!({
                "schedules": outcome.schedules.len(),
                "created": outcome.created,
                "skipped": outcome.skipped,
            }),
            req,
        );
    }
    to_json(&outcome)
}

fn handle_record_credit(state: &AppState, req: &Request, kind: EntryKind) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageFinance)?;
    let credit = parse_credit(&req.params)?;
    let entry = match kind {
        EntryKind::Waiver => ledger::record_waiver(conn, &credit)?,
        _ => ledger::record_payment(conn, &credit)?,
    };
    let student = students::get_student(conn, &entry.student_id)?;
    let action = if kind == EntryKind::Waiver {
        AuditAction::Waiver
    } else {
        AuditAction::Payment
    };
    record_audit(
        conn,
        &actor,
        action,
        Target::new("student", &student.id, student.display()),
        json!({
            "entryId": entry.id,
            "amount": entry.amount,
            "reference": entry.reference,
            "balance": student.balance,
        }),
        req,
    );

    let notification = if kind == EntryKind::Payment {
        notify::send_payment_receipt(
            conn,
            state.notifier.as_ref(),
            &state.config.school_name,
            &student,
            &entry,
        )
    } else {
        None
    };

    Ok(json!({
        "entry": to_json(&entry)?,
        "balance": student.balance,
        "notification": to_json(&notification)?,
    }))
}

fn handle_entries(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let student_id = required_str(&req.params, "studentId")?;
    let entries = ledger::list_entries(conn, &student_id)?;
    Ok(json!({ "entries": to_json(&entries)? }))
}

fn handle_recompute_balance(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let student_id = required_str(&req.params, "studentId")?;
    let balance = ledger::recompute_balance(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "balance": balance }))
}

fn handle_recompute_all(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageFinance)?;
    let outcome = ledger::recompute_all_balances(conn)?;
    if outcome.corrected > 0 {
        record_audit(
            conn,
            &actor,
            AuditAction::Update,
            Target {
                kind: "balances".into(),
                ..Target::default()
            },
            json!({ "corrected": outcome.corrected }),
            req,
        );
    }
    to_json(&outcome)
}

fn handle_mark_invoices_viewed(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let student_id = required_str(&req.params, "studentId")?;
    let marked = ledger::mark_invoices_viewed(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "marked": marked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "ledger.applyFeeSchedule" => handle_apply_fee_schedule(state, req),
        "ledger.bulkInvoiceTerm" => handle_bulk_invoice_term(state, req),
        "ledger.recordPayment" => handle_record_credit(state, req, EntryKind::Payment),
        "ledger.recordWaiver" => handle_record_credit(state, req, EntryKind::Waiver),
        "ledger.entries" => handle_entries(state, req),
        "ledger.recomputeBalance" => handle_recompute_balance(state, req),
        "ledger.recomputeAll" => handle_recompute_all(state, req),
        "ledger.markInvoicesViewed" => handle_mark_invoices_viewed(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

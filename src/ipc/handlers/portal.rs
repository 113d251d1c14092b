//! Read-only views for STUDENT and PARENT logins.

use crate::access::{self, Permission, User};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{authorize, required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::{ledger, reports, students};
use rusqlite::Connection;
use serde_json::json;

fn ensure_visible(conn: &Connection, user: &User, student_id: &str) -> AppResult<()> {
    if access::portal_can_view(conn, user, student_id)? {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} may not view student {}",
            user.username, student_id
        )))
    }
}

fn handle_students(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, user) = authorize(state, req, Permission::Portal)?;
    let ids = access::portal_student_ids(conn, &user)?;
    let rows = students::students_by_ids(conn, &ids)?;
    Ok(json!({ "students": to_json(&rows)? }))
}

/// Opening a statement through the portal counts as seeing its invoices.
fn handle_statement(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, user) = authorize(state, req, Permission::Portal)?;
    let student_id = required_str(&req.params, "studentId")?;
    ensure_visible(conn, &user, &student_id)?;
    let statement = reports::statement(conn, &student_id)?;
    let newly_viewed = ledger::mark_invoices_viewed(conn, &student_id)?;
    let mut out = to_json(&statement)?;
    out["newlyViewed"] = json!(newly_viewed);
    Ok(out)
}

fn handle_receipt(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, user) = authorize(state, req, Permission::Portal)?;
    let entry_id = required_str(&req.params, "entryId")?;
    let entry = ledger::get_entry(conn, &entry_id)?;
    ensure_visible(conn, &user, &entry.student_id)?;
    to_json(&reports::receipt(conn, &state.config.school_name, &entry_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "portal.students" => handle_students(state, req),
        "portal.statement" => handle_statement(state, req),
        "portal.receipt" => handle_receipt(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

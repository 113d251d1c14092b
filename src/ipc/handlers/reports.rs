use crate::access::Permission;
use crate::error::AppError;
use crate::ipc::helpers::{authorize, optional_str, required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::money::Money;
use crate::reports;
use chrono::NaiveDate;

fn handle_defaulters(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let min_amount = match req.params.get("minAmount") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(Money::from_json(v)?),
    };
    let class_id = optional_str(&req.params, "classId")?;
    to_json(&reports::defaulters(conn, min_amount, class_id.as_deref())?)
}

fn handle_daily_collection(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let date = optional_str(&req.params, "date")?
        .map(|d| {
            NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|_| AppError::validation("date must be YYYY-MM-DD"))
        })
        .transpose()?;
    to_json(&reports::daily_collection(conn, date)?)
}

fn handle_bursar_dashboard(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    to_json(&reports::bursar_dashboard(conn)?)
}

/// Staff view of a statement; unlike the portal it leaves invoices unseen.
fn handle_statement(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let student_id = required_str(&req.params, "studentId")?;
    to_json(&reports::statement(conn, &student_id)?)
}

fn handle_receipt(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let entry_id = required_str(&req.params, "entryId")?;
    to_json(&reports::receipt(conn, &state.config.school_name, &entry_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.defaulters" => handle_defaulters(state, req),
        "reports.dailyCollection" => handle_daily_collection(state, req),
        "reports.bursarDashboard" => handle_bursar_dashboard(state, req),
        "reports.statement" => handle_statement(state, req),
        "reports.receipt" => handle_receipt(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

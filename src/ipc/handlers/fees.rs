use crate::access::Permission;
use crate::audit::{AuditAction, Target};
use crate::fees::{self, NewFeeSchedules};
use crate::ipc::helpers::{
    authorize, optional_str, optional_str_list, record_audit, required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::money::Money;
use serde_json::json;

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageFinance)?;
    let p = &req.params;
    let class_ids = match optional_str_list(p, "classIds")? {
        Some(ids) => ids,
        None => vec![required_str(p, "classId")?],
    };
    let amount = Money::positive_from_json(p.get("amount").unwrap_or(&serde_json::Value::Null))?;
    let created = fees::create_fee_schedules(
        conn,
        &NewFeeSchedules {
            term_id: required_str(p, "termId")?,
            class_ids,
            amount,
            description: required_str(p, "description")?,
            due_date: optional_str(p, "dueDate")?,
        },
    )?;
    for f in &created {
        record_audit(
            conn,
            &actor,
            AuditAction::Create,
            Target::new(
                "fee_schedule",
                &f.id,
                format!("{} - {} {}", f.description, f.class_name, f.term_name),
            ),
            json!({ "amount": f.amount }),
            req,
        );
    }
    Ok(json!({ "feeSchedules": to_json(&created)? }))
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let term_id = optional_str(&req.params, "termId")?;
    let class_id = optional_str(&req.params, "classId")?;
    let rows = fees::list_fee_schedules(conn, term_id.as_deref(), class_id.as_deref())?;
    Ok(json!({ "feeSchedules": to_json(&rows)? }))
}

fn handle_get(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let id = required_str(&req.params, "feeScheduleId")?;
    to_json(&fees::get_fee_schedule(conn, &id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "fees.create" => handle_create(state, req),
        "fees.list" => handle_list(state, req),
        "fees.get" => handle_get(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

use crate::access::Permission;
use crate::audit::{self, AuditAction, Target};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    authenticate, authorize, optional_str, optional_usize, record_audit, required_str, respond,
    to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_action(raw: &str) -> AppResult<AuditAction> {
    AuditAction::parse(raw).ok_or_else(|| AppError::validation(format!("unknown action: {}", raw)))
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewAudit)?;
    let action = optional_str(&req.params, "action")?
        .map(|a| parse_action(&a))
        .transpose()?;
    let actor = optional_str(&req.params, "actor")?;
    let limit = optional_usize(&req.params, "limit")?;
    let rows = audit::list(conn, action, actor.as_deref(), limit)?;
    Ok(json!({ "entries": to_json(&rows)? }))
}

/// Lets the front end record events the daemon cannot see itself, such as
/// sign-in and sign-out.
fn handle_log(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, user) = authenticate(state, req)?;
    let action = parse_action(&required_str(&req.params, "action")?)?;
    if !action.is_client_loggable() {
        return Err(AppError::validation(format!(
            "{} is recorded by the daemon itself",
            action.as_str()
        )));
    }
    let target = Target {
        kind: optional_str(&req.params, "targetType")?.unwrap_or_else(|| "session".into()),
        id: optional_str(&req.params, "targetId")?,
        repr: optional_str(&req.params, "targetRepr")?,
    };
    let details = req.params.get("details").cloned().unwrap_or(json!(null));
    record_audit(conn, &user, action, target, details, req);
    Ok(json!({ "logged": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "audit.list" => handle_list(state, req),
        "audit.log" => handle_log(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

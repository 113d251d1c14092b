use crate::access::Permission;
use crate::error::AppError;
use crate::ipc::helpers::{
    authorize, optional_str, optional_usize, required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Channel, Status};
use serde_json::json;

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewNotifications)?;
    let status = optional_str(&req.params, "status")?
        .map(|s| {
            Status::parse(&s).ok_or_else(|| AppError::validation(format!("unknown status: {}", s)))
        })
        .transpose()?;
    let limit = optional_usize(&req.params, "limit")?;
    let rows = notify::list(conn, status, limit)?;
    Ok(json!({ "notifications": to_json(&rows)? }))
}

fn handle_send(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageFinance)?;
    let channel = match optional_str(&req.params, "channel")? {
        Some(c) => Channel::parse(&c)
            .ok_or_else(|| AppError::validation("channel must be SMS or EMAIL"))?,
        None => Channel::Sms,
    };
    let recipient = optional_str(&req.params, "recipient")?.unwrap_or_default();
    let subject = optional_str(&req.params, "subject")?;
    let body = required_str(&req.params, "body")?;
    let record = notify::send(
        conn,
        state.notifier.as_ref(),
        &recipient,
        channel,
        subject.as_deref(),
        &body,
    )?;
    Ok(json!({ "notification": to_json(&record)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.list" => handle_list(state, req),
        "notifications.send" => handle_send(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

use crate::access::{self, Permission, User};
use crate::audit::{self, AuditAction, Target};
use crate::error::{AppError, AppResult};
use crate::ipc::error::{app_err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;

pub type HandlerResult = AppResult<Value>;

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => app_err(&req.id, &e),
    }
}

pub fn to_json<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value)
        .map_err(|e| AppError::validation(format!("failed to encode result: {}", e)))
}

pub fn db_conn(state: &AppState) -> AppResult<&Connection> {
    state.db.as_ref().ok_or(AppError::NoWorkspace)
}

/// Resolves the request's actor and checks it holds `perm`.
pub fn authorize<'a>(
    state: &'a AppState,
    req: &Request,
    perm: Permission,
) -> AppResult<(&'a Connection, User)> {
    let (conn, user) = authenticate(state, req)?;
    user.require(perm)?;
    Ok((conn, user))
}

pub fn authenticate<'a>(state: &'a AppState, req: &Request) -> AppResult<(&'a Connection, User)> {
    let conn = db_conn(state)?;
    let username = req
        .actor
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("request names no actor".into()))?;
    let user = access::resolve_actor(conn, username)?;
    Ok((conn, user))
}

/// Records a committed mutation. A failed audit write is logged but does not
/// undo or fail the request it describes.
pub fn record_audit(
    conn: &Connection,
    actor: &User,
    action: AuditAction,
    target: Target,
    details: Value,
    req: &Request,
) {
    let ip = optional_str(&req.params, "ipAddress").ok().flatten();
    if let Err(e) = audit::append(
        conn,
        Some(&actor.username),
        action,
        &target,
        &details,
        ip.as_deref(),
    ) {
        tracing::warn!(method = %req.method, error = %e, "audit append failed");
    }
}

pub fn required_str(params: &Value, key: &str) -> AppResult<String> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(AppError::validation(format!("{} must not be empty", key))),
        Some(Value::Null) | None => Err(AppError::validation(format!("missing {}", key))),
        Some(_) => Err(AppError::validation(format!("{} must be a string", key))),
    }
}

pub fn optional_str(params: &Value, key: &str) -> AppResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(AppError::validation(format!("{} must be a string", key))),
    }
}

/// Three states for patch fields: absent (`None`), explicit null
/// (`Some(None)`), or a value.
pub fn nullable_str(params: &Value, key: &str) -> AppResult<Option<Option<String>>> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok(Some((!s.is_empty()).then(|| s.to_string())))
        }
        Some(_) => Err(AppError::validation(format!("{} must be a string or null", key))),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> AppResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(AppError::validation(format!("{} must be a boolean", key))),
    }
}

pub fn optional_usize(params: &Value, key: &str) -> AppResult<Option<usize>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| AppError::validation(format!("{} must be a non-negative integer", key))),
    }
}

pub fn optional_str_list(params: &Value, key: &str) -> AppResult<Option<Vec<String>>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        AppError::validation(format!("{} must contain non-empty strings", key))
                    })
            })
            .collect::<AppResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(AppError::validation(format!("{} must be an array", key))),
    }
}

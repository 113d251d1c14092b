use crate::access::{self, NewUser, Permission, Role};
use crate::audit::{AuditAction, Target};
use crate::error::AppError;
use crate::ipc::helpers::{
    authenticate, authorize, db_conn, optional_bool, optional_str, record_audit, required_str,
    respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_role(raw: &str) -> Result<Role, AppError> {
    Role::parse(raw).ok_or_else(|| {
        AppError::validation(format!(
            "role must be one of ADMIN, BURSAR, TEACHER, PARENT, STUDENT (got {})",
            raw
        ))
    })
}

fn handle_bootstrap(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let username = required_str(&req.params, "username")?;
    let user = access::bootstrap_admin(conn, &username)?;
    tracing::info!(username = %user.username, "first administrator created");
    record_audit(
        conn,
        &user,
        AuditAction::Create,
        Target::new("user", &user.id, &user.username),
        json!({ "role": user.role, "bootstrap": true }),
        req,
    );
    to_json(&user)
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageUsers)?;
    let role = parse_role(&required_str(&req.params, "role")?)?;
    let user = access::create_user(
        conn,
        &NewUser {
            username: required_str(&req.params, "username")?,
            role,
            phone: optional_str(&req.params, "phone")?,
            email: optional_str(&req.params, "email")?,
        },
    )?;
    record_audit(
        conn,
        &actor,
        AuditAction::Create,
        Target::new("user", &user.id, &user.username),
        json!({ "role": user.role }),
        req,
    );
    to_json(&user)
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ManageUsers)?;
    let role = optional_str(&req.params, "role")?
        .map(|r| parse_role(&r))
        .transpose()?;
    let users = access::list_users(conn, role)?;
    Ok(json!({ "users": to_json(&users)? }))
}

fn handle_set_active(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageUsers)?;
    let user_id = required_str(&req.params, "userId")?;
    let active = optional_bool(&req.params, "active")?
        .ok_or_else(|| AppError::validation("missing active"))?;
    if user_id == actor.id && !active {
        return Err(AppError::validation("you cannot deactivate yourself"));
    }
    let user = access::set_user_active(conn, &user_id, active)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("user", &user.id, &user.username),
        json!({ "active": active }),
        req,
    );
    to_json(&user)
}

fn handle_me(state: &AppState, req: &Request) -> HandlerResult {
    let (_, user) = authenticate(state, req)?;
    to_json(&user)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.bootstrap" => handle_bootstrap(state, req),
        "users.create" => handle_create(state, req),
        "users.list" => handle_list(state, req),
        "users.setActive" => handle_set_active(state, req),
        "users.me" => handle_me(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

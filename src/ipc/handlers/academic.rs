use crate::academic;
use crate::access::Permission;
use crate::audit::{AuditAction, Target};
use crate::ipc::helpers::{
    authorize, optional_bool, optional_str, record_audit, required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_sessions_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let name = required_str(&req.params, "name")?;
    let is_current = optional_bool(&req.params, "isCurrent")?.unwrap_or(false);
    let session = academic::create_session(conn, &name, is_current)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Create,
        Target::new("session", &session.id, &session.name),
        json!({ "isCurrent": session.is_current }),
        req,
    );
    to_json(&session)
}

fn handle_sessions_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let sessions = academic::list_sessions(conn)?;
    Ok(json!({ "sessions": to_json(&sessions)? }))
}

fn handle_sessions_set_current(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let id = required_str(&req.params, "sessionId")?;
    let session = academic::set_current_session(conn, &id)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("session", &session.id, &session.name),
        json!({ "isCurrent": true }),
        req,
    );
    to_json(&session)
}

fn handle_terms_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let session_id = required_str(&req.params, "sessionId")?;
    let name = required_str(&req.params, "name")?;
    let is_current = optional_bool(&req.params, "isCurrent")?.unwrap_or(false);
    let term = academic::create_term(conn, &session_id, &name, is_current)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Create,
        Target::new("term", &term.id, format!("{} {}", term.session_name, term.name)),
        json!({ "isCurrent": term.is_current }),
        req,
    );
    to_json(&term)
}

fn handle_terms_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let session_id = optional_str(&req.params, "sessionId")?;
    let terms = academic::list_terms(conn, session_id.as_deref())?;
    Ok(json!({ "terms": to_json(&terms)? }))
}

fn handle_terms_current(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let term = academic::current_term(conn)?;
    Ok(json!({ "term": to_json(&term)? }))
}

fn handle_terms_set_current(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let id = required_str(&req.params, "termId")?;
    let term = academic::set_current_term(conn, &id)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("term", &term.id, format!("{} {}", term.session_name, term.name)),
        json!({ "isCurrent": true }),
        req,
    );
    to_json(&term)
}

fn handle_classes_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let name = required_str(&req.params, "name")?;
    let class = academic::create_class(conn, &name)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Create,
        Target::new("class", &class.id, &class.name),
        json!(null),
        req,
    );
    to_json(&class)
}

fn handle_classes_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let classes = academic::list_classes(conn)?;
    Ok(json!({ "classes": to_json(&classes)? }))
}

fn handle_classes_get(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let id = required_str(&req.params, "classId")?;
    to_json(&academic::get_class(conn, &id)?)
}

fn handle_classes_update(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let id = required_str(&req.params, "classId")?;
    let name = required_str(&req.params, "name")?;
    let before = academic::get_class(conn, &id)?;
    let class = academic::rename_class(conn, &id, &name)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("class", &class.id, &class.name),
        json!({ "previousName": before.name }),
        req,
    );
    to_json(&class)
}

fn handle_classes_delete(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageAcademic)?;
    let id = required_str(&req.params, "classId")?;
    let class = academic::get_class(conn, &id)?;
    academic::delete_class(conn, &id)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Delete,
        Target::new("class", &class.id, &class.name),
        json!(null),
        req,
    );
    Ok(json!({ "deleted": true, "classId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sessions.create" => handle_sessions_create(state, req),
        "sessions.list" => handle_sessions_list(state, req),
        "sessions.setCurrent" => handle_sessions_set_current(state, req),
        "terms.create" => handle_terms_create(state, req),
        "terms.list" => handle_terms_list(state, req),
        "terms.current" => handle_terms_current(state, req),
        "terms.setCurrent" => handle_terms_set_current(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.list" => handle_classes_list(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

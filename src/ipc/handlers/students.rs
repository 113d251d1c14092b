use crate::access::Permission;
use crate::audit::{AuditAction, Target};
use crate::error::AppError;
use crate::ipc::helpers::{
    authorize, nullable_str, optional_str, record_audit, required_str, respond, to_json,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::students::{self, NewStudent, StudentPatch};
use serde_json::json;

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageStudents)?;
    let p = &req.params;
    let student = students::create_student(
        conn,
        &NewStudent {
            admission_number: required_str(p, "admissionNumber")?,
            first_name: required_str(p, "firstName")?,
            last_name: required_str(p, "lastName")?,
            date_of_birth: optional_str(p, "dateOfBirth")?,
            class_id: optional_str(p, "classId")?,
            parent_phone: required_str(p, "parentPhone")?,
            parent_email: optional_str(p, "parentEmail")?,
        },
    )?;
    record_audit(
        conn,
        &actor,
        AuditAction::Create,
        Target::new("student", &student.id, student.display()),
        json!({ "classId": student.class_id }),
        req,
    );
    to_json(&student)
}

fn handle_get(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let id = required_str(&req.params, "studentId")?;
    to_json(&students::get_student(conn, &id)?)
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, _) = authorize(state, req, Permission::ViewStudents)?;
    let class_id = optional_str(&req.params, "classId")?;
    let search = optional_str(&req.params, "search")?;
    let rows = students::list_students(conn, class_id.as_deref(), search.as_deref())?;
    Ok(json!({ "students": to_json(&rows)? }))
}

fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageStudents)?;
    let id = required_str(&req.params, "studentId")?;
    let Some(p) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(AppError::validation("missing patch"));
    };
    if p.get("balance").is_some() {
        return Err(AppError::validation(
            "balance is derived from the ledger and cannot be edited",
        ));
    }
    let patch = StudentPatch {
        admission_number: optional_str(p, "admissionNumber")?,
        first_name: optional_str(p, "firstName")?,
        last_name: optional_str(p, "lastName")?,
        date_of_birth: nullable_str(p, "dateOfBirth")?,
        class_id: nullable_str(p, "classId")?,
        parent_phone: optional_str(p, "parentPhone")?,
        parent_email: nullable_str(p, "parentEmail")?,
    };
    let student = students::update_student(conn, &id, &patch)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("student", &student.id, student.display()),
        json!({ "fields": p.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()) }),
        req,
    );
    to_json(&student)
}

fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageStudents)?;
    let id = required_str(&req.params, "studentId")?;
    let student = students::delete_student(conn, &id)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Delete,
        Target::new("student", &student.id, student.display()),
        json!(null),
        req,
    );
    Ok(json!({ "deleted": true, "studentId": id }))
}

fn handle_link_user(state: &AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageStudents)?;
    let id = required_str(&req.params, "studentId")?;
    let user_id = optional_str(&req.params, "userId")?;
    let student = students::link_user(conn, &id, user_id.as_deref())?;
    record_audit(
        conn,
        &actor,
        AuditAction::Update,
        Target::new("student", &student.id, student.display()),
        json!({ "userId": student.user_id }),
        req,
    );
    to_json(&student)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => handle_create(state, req),
        "students.get" => handle_get(state, req),
        "students.list" => handle_list(state, req),
        "students.update" => handle_update(state, req),
        "students.delete" => handle_delete(state, req),
        "students.linkUser" => handle_link_user(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

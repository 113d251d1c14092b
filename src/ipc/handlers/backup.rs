use crate::access::Permission;
use crate::audit::{AuditAction, Target};
use crate::backup;
use crate::db;
use crate::error::AppError;
use crate::ipc::helpers::{authorize, record_audit, required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_workspace_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let (conn, actor) = authorize(state, req, Permission::ManageBackup)?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    let Some(workspace_path) = state.workspace.clone() else {
        return Err(AppError::NoWorkspace);
    };

    let export =
        backup::export_workspace_bundle(&workspace_path, &out_path).map_err(AppError::Backup)?;
    record_audit(
        conn,
        &actor,
        AuditAction::Export,
        Target {
            kind: "workspace".into(),
            id: None,
            repr: Some(out_path.to_string_lossy().to_string()),
        },
        json!({ "sha256": export.sha256 }),
        req,
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "sha256": export.sha256,
        "dbBytes": export.db_bytes,
    }))
}

fn handle_import_workspace_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = authorize(state, req, Permission::ManageBackup)?.1;
    let in_path = PathBuf::from(required_str(&req.params, "inPath")?);
    if !in_path.is_file() {
        return Err(AppError::not_found(
            "bundle",
            in_path.to_string_lossy().to_string(),
        ));
    }
    let Some(workspace_path) = state.workspace.clone() else {
        return Err(AppError::NoWorkspace);
    };

    // Drop open handle before replacing file.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace_path);
    let conn = db::open_db(&workspace_path).map_err(AppError::Backup)?;
    state.db = Some(conn);
    let imported = imported.map_err(AppError::Backup)?;

    if let Some(conn) = state.db.as_ref() {
        record_audit(
            conn,
            &actor,
            AuditAction::Import,
            Target {
                kind: "workspace".into(),
                id: None,
                repr: Some(in_path.to_string_lossy().to_string()),
            },
            json!({ "sha256": imported.sha256, "exportedAt": imported.exported_at }),
            req,
        );
    }
    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormat": imported.bundle_format,
        "sha256": imported.sha256,
        "exportedAt": imported.exported_at,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export_workspace_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_import_workspace_bundle(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

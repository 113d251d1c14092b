use crate::error::AppError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Converts a domain failure into an error reply.
pub fn app_err(id: &str, e: &AppError) -> serde_json::Value {
    let details = match e {
        AppError::DuplicateReference(r) => Some(json!({ "reference": r })),
        AppError::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
        _ => None,
    };
    if matches!(e, AppError::Persistence(_) | AppError::Backup(_)) {
        tracing::error!(code = e.code(), error = %e, "request failed");
    }
    err(id, e.code(), e.to_string(), details)
}

//! Append-only audit trail. Rows are written by the request layer after a
//! mutation commits; triggers refuse any later update or delete.

use crate::db::now_ts;
use crate::error::{AppError, AppResult};
use rusqlite::{Connection, Row};
use serde::Serialize;

pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Payment,
    Waiver,
    Invoice,
    Export,
    Import,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Payment => "PAYMENT",
            Self::Waiver => "WAIVER",
            Self::Invoice => "INVOICE",
            Self::Export => "EXPORT",
            Self::Import => "IMPORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Self::Create,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "LOGIN" => Self::Login,
            "LOGOUT" => Self::Logout,
            "PAYMENT" => Self::Payment,
            "WAIVER" => Self::Waiver,
            "INVOICE" => Self::Invoice,
            "EXPORT" => Self::Export,
            "IMPORT" => Self::Import,
            _ => return None,
        })
    }

    /// Actions a front end may record directly through `audit.log`.
    pub fn is_client_loggable(self) -> bool {
        matches!(self, Self::Login | Self::Logout | Self::Export)
    }
}

/// What an audit row is about.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub kind: String,
    pub id: Option<String>,
    pub repr: Option<String>,
}

impl Target {
    pub fn new(kind: &str, id: impl Into<String>, repr: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            id: Some(id.into()),
            repr: Some(repr.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: i64,
    pub actor: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub target_repr: Option<String>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub created_at: String,
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let details: Option<String> = r.get(6)?;
    Ok(AuditRecord {
        id: r.get(0)?,
        actor: r.get(1)?,
        action: r.get(2)?,
        target_type: r.get(3)?,
        target_id: r.get(4)?,
        target_repr: r.get(5)?,
        details: details
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or(serde_json::Value::Null),
        ip_address: r.get(7)?,
        created_at: r.get(8)?,
    })
}

pub fn append(
    conn: &Connection,
    actor: Option<&str>,
    action: AuditAction,
    target: &Target,
    details: &serde_json::Value,
    ip_address: Option<&str>,
) -> AppResult<i64> {
    let details = if details.is_null() {
        None
    } else {
        Some(details.to_string())
    };
    conn.execute(
        "INSERT INTO audit_log(actor, action, target_type, target_id, target_repr, details, ip_address, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            actor,
            action.as_str(),
            &target.kind,
            &target.id,
            &target.repr,
            details,
            ip_address,
            now_ts(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first. `limit` is clamped to [`MAX_LIST_LIMIT`].
pub fn list(
    conn: &Connection,
    action: Option<AuditAction>,
    actor: Option<&str>,
    limit: Option<usize>,
) -> AppResult<Vec<AuditRecord>> {
    let limit = limit.unwrap_or(MAX_LIST_LIMIT);
    if limit == 0 {
        return Err(AppError::validation("limit must be at least 1"));
    }
    let limit = limit.min(MAX_LIST_LIMIT) as i64;
    let mut stmt = conn.prepare(
        "SELECT id, actor, action, target_type, target_id, target_repr, details, ip_address, created_at
         FROM audit_log
         WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR actor = ?2)
         ORDER BY id DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map((action.map(AuditAction::as_str), actor, limit), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;
    use serde_json::json;

    #[test]
    fn append_and_filter() {
        let conn = open_memory();
        let t = Target::new("student", "s1", "Ada Obi (ADM001)");
        append(&conn, Some("admin"), AuditAction::Create, &t, &json!({}), None).unwrap();
        append(
            &conn,
            Some("bursar"),
            AuditAction::Payment,
            &t,
            &json!({"amount": "500.00"}),
            Some("10.0.0.2"),
        )
        .unwrap();
        append(&conn, Some("admin"), AuditAction::Login, &Target::default(), &json!(null), None)
            .unwrap();

        let all = list(&conn, None, None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, "LOGIN");

        let payments = list(&conn, Some(AuditAction::Payment), None, None).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].details["amount"], "500.00");
        assert_eq!(payments[0].ip_address.as_deref(), Some("10.0.0.2"));

        assert_eq!(list(&conn, None, Some("admin"), Some(1)).unwrap().len(), 1);
        assert!(list(&conn, None, None, Some(0)).is_err());
    }

    #[test]
    fn rows_are_write_once() {
        let conn = open_memory();
        let id = append(
            &conn,
            None,
            AuditAction::Export,
            &Target::default(),
            &json!(null),
            None,
        )
        .unwrap();
        assert!(conn
            .execute("UPDATE audit_log SET action = 'DELETE' WHERE id = ?", [id])
            .is_err());
        assert!(conn.execute("DELETE FROM audit_log", []).is_err());
    }
}

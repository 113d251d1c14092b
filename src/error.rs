use thiserror::Error;

/// Failures raised by the stores and the billing engine.
///
/// Every variant maps to a stable wire code (see [`AppError::code`]) so the
/// presentation layer can turn it into a user-visible message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("reference already used: {0}")]
    DuplicateReference(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("unknown or inactive actor: {0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("{0:#}")]
    Backup(anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::DuplicateReference(_) => "duplicate_reference",
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "db_error",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NoWorkspace => "no_workspace",
            Self::Backup(_) => "backup_failed",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// True when `e` is SQLite rejecting a row because of a UNIQUE constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table, index and guard trigger the daemon relies on.
/// Safe to run against an existing workspace.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK(role IN ('ADMIN','BURSAR','TEACHER','PARENT','STUDENT')),
            phone TEXT,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            UNIQUE(session_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_session ON terms(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_birth TEXT,
            class_id TEXT,
            parent_phone TEXT NOT NULL,
            parent_email TEXT,
            user_id TEXT UNIQUE,
            balance_cents INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_schedules(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL CHECK(amount_cents > 0),
            description TEXT NOT NULL,
            due_date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_schedules_term ON fee_schedules(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_schedules_class ON fee_schedules(class_id)",
        [],
    )?;

    // `reference` UNIQUE is what makes invoicing idempotent under concurrent
    // submissions; callers rely on the constraint, not on a prior lookup.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('INVOICE','PAYMENT','WAIVER')),
            amount_cents INTEGER NOT NULL CHECK(amount_cents >= 0),
            description TEXT NOT NULL,
            reference TEXT NOT NULL UNIQUE,
            fee_schedule_id TEXT,
            posted_at TEXT NOT NULL,
            viewed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_schedule_id) REFERENCES fee_schedules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_entries_student ON ledger_entries(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_entries_kind_posted ON ledger_entries(kind, posted_at)",
        [],
    )?;
    // Entries are append-only: only the viewed flag may change.
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_ledger_entries_no_delete
         BEFORE DELETE ON ledger_entries
         BEGIN
           SELECT RAISE(ABORT, 'ledger entries are append-only');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_ledger_entries_no_update
         BEFORE UPDATE OF student_id, kind, amount_cents, description, reference, fee_schedule_id, posted_at
         ON ledger_entries
         BEGIN
           SELECT RAISE(ABORT, 'ledger entries are append-only');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor TEXT,
            action TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT,
            target_repr TEXT,
            details TEXT,
            ip_address TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor)",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_audit_log_no_update
         BEFORE UPDATE ON audit_log
         BEGIN
           SELECT RAISE(ABORT, 'audit log is write-once');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_audit_log_no_delete
         BEFORE DELETE ON audit_log
         BEGIN
           SELECT RAISE(ABORT, 'audit log is write-once');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_log(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            channel TEXT NOT NULL CHECK(channel IN ('SMS','EMAIL')),
            subject TEXT,
            body TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('PENDING','SENT','FAILED')),
            error_message TEXT,
            created_at TEXT NOT NULL,
            sent_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_log_status ON notification_log(status)",
        [],
    )?;

    Ok(())
}

/// Current UTC time in the fixed-width RFC 3339 form every table stores,
/// so lexical order matches chronological order.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Row-mapping error for a text column holding a value no enum variant
/// matches.
pub fn unknown_variant(column: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unknown {}: {}", what, value).into(),
    )
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    init_schema(&conn).expect("schema");
    conn
}

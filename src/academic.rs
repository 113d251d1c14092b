//! Sessions, terms and classes: reference data for students and fees.

use crate::error::{is_unique_violation, AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSession {
    pub id: String,
    pub name: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: String,
    pub session_id: String,
    pub session_name: String,
    pub name: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentClass {
    pub id: String,
    pub name: String,
    pub student_count: i64,
}

fn clean_name(name: &str, what: &str, max_len: usize) -> AppResult<String> {
    let n = name.trim();
    if n.is_empty() {
        return Err(AppError::validation(format!("{} must not be empty", what)));
    }
    if n.chars().count() > max_len {
        return Err(AppError::validation(format!(
            "{} length must be <= {}",
            what, max_len
        )));
    }
    Ok(n.to_string())
}

fn map_duplicate(e: rusqlite::Error, message: String) -> AppError {
    if is_unique_violation(&e) {
        AppError::validation(message)
    } else {
        AppError::from(e)
    }
}

// ---- sessions ----

pub fn create_session(conn: &Connection, name: &str, is_current: bool) -> AppResult<AcademicSession> {
    let name = clean_name(name, "session name", 20)?;
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO academic_sessions(id, name, is_current) VALUES(?, ?, 0)",
        (&id, &name),
    )
    .map_err(|e| map_duplicate(e, format!("session already exists: {}", name)))?;
    if is_current {
        flip_current(&tx, CurrentTable::Sessions, &id)?;
    }
    tx.commit()?;
    get_session(conn, &id)
}

pub fn get_session(conn: &Connection, id: &str) -> AppResult<AcademicSession> {
    conn.query_row(
        "SELECT id, name, is_current FROM academic_sessions WHERE id = ?",
        [id],
        |r| {
            Ok(AcademicSession {
                id: r.get(0)?,
                name: r.get(1)?,
                is_current: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("session", id))
}

pub fn list_sessions(conn: &Connection) -> AppResult<Vec<AcademicSession>> {
    let mut stmt =
        conn.prepare("SELECT id, name, is_current FROM academic_sessions ORDER BY name DESC")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(AcademicSession {
                id: r.get(0)?,
                name: r.get(1)?,
                is_current: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Marks one session current and clears the flag on every other session,
/// atomically.
pub fn set_current_session(conn: &Connection, id: &str) -> AppResult<AcademicSession> {
    let tx = conn.unchecked_transaction()?;
    if !flip_current(&tx, CurrentTable::Sessions, id)? {
        return Err(AppError::not_found("session", id));
    }
    tx.commit()?;
    get_session(conn, id)
}

#[derive(Clone, Copy)]
enum CurrentTable {
    Sessions,
    Terms,
}

impl CurrentTable {
    fn name(self) -> &'static str {
        match self {
            Self::Sessions => "academic_sessions",
            Self::Terms => "terms",
        }
    }
}

/// Clears `is_current` on every other row and sets it on `id`. Runs inside
/// the caller's transaction; returns false when `id` does not exist.
fn flip_current(conn: &Connection, table: CurrentTable, id: &str) -> AppResult<bool> {
    let t = table.name();
    let exists: Option<i64> = conn
        .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", t), [id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Ok(false);
    }
    conn.execute(
        &format!(
            "UPDATE {} SET is_current = 0 WHERE id <> ? AND is_current <> 0",
            t
        ),
        [id],
    )?;
    conn.execute(&format!("UPDATE {} SET is_current = 1 WHERE id = ?", t), [id])?;
    Ok(true)
}

// ---- terms ----

const TERM_SELECT: &str = "SELECT t.id, t.session_id, s.name, t.name, t.is_current
     FROM terms t
     JOIN academic_sessions s ON s.id = t.session_id";

fn term_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Term> {
    Ok(Term {
        id: r.get(0)?,
        session_id: r.get(1)?,
        session_name: r.get(2)?,
        name: r.get(3)?,
        is_current: r.get::<_, i64>(4)? != 0,
    })
}

pub fn create_term(
    conn: &Connection,
    session_id: &str,
    name: &str,
    is_current: bool,
) -> AppResult<Term> {
    let name = clean_name(name, "term name", 20)?;
    get_session(conn, session_id)?;
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO terms(id, session_id, name, is_current) VALUES(?, ?, ?, 0)",
        (&id, session_id, &name),
    )
    .map_err(|e| map_duplicate(e, format!("term already exists in session: {}", name)))?;
    if is_current {
        flip_current(&tx, CurrentTable::Terms, &id)?;
    }
    tx.commit()?;
    get_term(conn, &id)
}

pub fn get_term(conn: &Connection, id: &str) -> AppResult<Term> {
    let sql = format!("{} WHERE t.id = ?", TERM_SELECT);
    conn.query_row(&sql, [id], term_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("term", id))
}

pub fn list_terms(conn: &Connection, session_id: Option<&str>) -> AppResult<Vec<Term>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR t.session_id = ?1) ORDER BY s.name DESC, t.name",
        TERM_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([session_id], term_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn current_term(conn: &Connection) -> AppResult<Option<Term>> {
    let sql = format!("{} WHERE t.is_current <> 0", TERM_SELECT);
    Ok(conn.query_row(&sql, [], term_from_row).optional()?)
}

pub fn set_current_term(conn: &Connection, id: &str) -> AppResult<Term> {
    let tx = conn.unchecked_transaction()?;
    if !flip_current(&tx, CurrentTable::Terms, id)? {
        return Err(AppError::not_found("term", id));
    }
    tx.commit()?;
    get_term(conn, id)
}

// ---- classes ----

pub fn create_class(conn: &Connection, name: &str) -> AppResult<StudentClass> {
    let name = clean_name(name, "class name", 50)?;
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO classes(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(|e| map_duplicate(e, format!("class already exists: {}", name)))?;
    get_class(conn, &id)
}

pub fn rename_class(conn: &Connection, id: &str, name: &str) -> AppResult<StudentClass> {
    let name = clean_name(name, "class name", 50)?;
    let changed = conn
        .execute("UPDATE classes SET name = ? WHERE id = ?", (&name, id))
        .map_err(|e| map_duplicate(e, format!("class already exists: {}", name)))?;
    if changed == 0 {
        return Err(AppError::not_found("class", id));
    }
    get_class(conn, id)
}

pub fn get_class(conn: &Connection, id: &str) -> AppResult<StudentClass> {
    conn.query_row(
        "SELECT c.id, c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
         FROM classes c WHERE c.id = ?",
        [id],
        |r| {
            Ok(StudentClass {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("class", id))
}

pub fn list_classes(conn: &Connection) -> AppResult<Vec<StudentClass>> {
    // Correlated subquery keeps the count honest without a GROUP BY join.
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StudentClass {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes a class nobody refers to. Classes with students or fee
/// schedules are kept so invoice history stays explainable.
pub fn delete_class(conn: &Connection, id: &str) -> AppResult<()> {
    let class = get_class(conn, id)?;
    if class.student_count > 0 {
        return Err(AppError::validation(format!(
            "class {} still has {} student(s)",
            class.name, class.student_count
        )));
    }
    let fees: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fee_schedules WHERE class_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if fees > 0 {
        return Err(AppError::validation(format!(
            "class {} is referenced by {} fee schedule(s)",
            class.name, fees
        )));
    }
    conn.execute("DELETE FROM classes WHERE id = ?", [id])?;
    Ok(())
}

//! Student directory.

use crate::db::now_ts;
use crate::error::{is_unique_violation, AppError, AppResult};
use crate::money::Money;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub parent_phone: String,
    pub parent_email: Option<String>,
    pub user_id: Option<String>,
    pub balance: Money,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn display(&self) -> String {
        format!("{} ({})", self.full_name(), self.admission_number)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub class_id: Option<String>,
    pub parent_phone: String,
    pub parent_email: Option<String>,
}

/// Partial update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub admission_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<Option<String>>,
    pub class_id: Option<Option<String>>,
    pub parent_phone: Option<String>,
    pub parent_email: Option<Option<String>>,
}

const STUDENT_SELECT: &str = "SELECT s.id, s.admission_number, s.first_name, s.last_name,
       s.date_of_birth, s.class_id, c.name, s.parent_phone, s.parent_email,
       s.user_id, s.balance_cents
     FROM students s
     LEFT JOIN classes c ON c.id = s.class_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        admission_number: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        date_of_birth: r.get(4)?,
        class_id: r.get(5)?,
        class_name: r.get(6)?,
        parent_phone: r.get(7)?,
        parent_email: r.get(8)?,
        user_id: r.get(9)?,
        balance: Money::from_cents(r.get(10)?),
    })
}

fn required(value: &str, what: &str, max_len: usize) -> AppResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::validation(format!("{} must not be empty", what)));
    }
    if v.chars().count() > max_len {
        return Err(AppError::validation(format!(
            "{} length must be <= {}",
            what, max_len
        )));
    }
    Ok(v.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn check_birth_date(value: Option<&str>) -> AppResult<Option<String>> {
    let Some(v) = optional_text(value) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&v, "%Y-%m-%d")
        .map_err(|_| AppError::validation("dateOfBirth must be YYYY-MM-DD"))?;
    Ok(Some(v))
}

fn check_email(value: Option<&str>) -> AppResult<Option<String>> {
    let Some(v) = optional_text(value) else {
        return Ok(None);
    };
    let valid = v
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(AppError::validation(format!("invalid parentEmail: {}", v)));
    }
    Ok(Some(v))
}

fn check_class(conn: &Connection, class_id: Option<&str>) -> AppResult<Option<String>> {
    let Some(cid) = optional_text(class_id) else {
        return Ok(None);
    };
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&cid], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("class", cid));
    }
    Ok(Some(cid))
}

fn map_insert_err(e: rusqlite::Error, admission_number: &str) -> AppError {
    if is_unique_violation(&e) {
        AppError::validation(format!(
            "admission number already registered: {}",
            admission_number
        ))
    } else {
        AppError::from(e)
    }
}

pub fn create_student(conn: &Connection, new: &NewStudent) -> AppResult<Student> {
    let admission_number = required(&new.admission_number, "admissionNumber", 20)?;
    let first_name = required(&new.first_name, "firstName", 100)?;
    let last_name = required(&new.last_name, "lastName", 100)?;
    let parent_phone = required(&new.parent_phone, "parentPhone", 15)?;
    let date_of_birth = check_birth_date(new.date_of_birth.as_deref())?;
    let parent_email = check_email(new.parent_email.as_deref())?;
    let class_id = check_class(conn, new.class_id.as_deref())?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, admission_number, first_name, last_name, date_of_birth,
            class_id, parent_phone, parent_email, balance_cents, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            &admission_number,
            &first_name,
            &last_name,
            &date_of_birth,
            &class_id,
            &parent_phone,
            &parent_email,
            now_ts(),
        ),
    )
    .map_err(|e| map_insert_err(e, &admission_number))?;
    get_student(conn, &id)
}

pub fn get_student(conn: &Connection, id: &str) -> AppResult<Student> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [id], student_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("student", id))
}

/// Lists students ordered by class then first name. `search` matches a
/// name or admission-number fragment, case-insensitively.
pub fn list_students(
    conn: &Connection,
    class_id: Option<&str>,
    search: Option<&str>,
) -> AppResult<Vec<Student>> {
    let pattern = optional_text(search).map(|s| format!("%{}%", s.to_lowercase()));
    let sql = format!(
        "{} WHERE (?1 IS NULL OR s.class_id = ?1)
           AND (?2 IS NULL
                OR lower(s.first_name) LIKE ?2
                OR lower(s.last_name) LIKE ?2
                OR lower(s.admission_number) LIKE ?2)
         ORDER BY c.name, s.first_name, s.last_name",
        STUDENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, pattern), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn students_by_ids(conn: &Connection, ids: &[String]) -> AppResult<Vec<Student>> {
    ids.iter().map(|id| get_student(conn, id)).collect()
}

pub fn update_student(conn: &Connection, id: &str, patch: &StudentPatch) -> AppResult<Student> {
    let current = get_student(conn, id)?;

    let admission_number = match &patch.admission_number {
        Some(v) => required(v, "admissionNumber", 20)?,
        None => current.admission_number.clone(),
    };
    let first_name = match &patch.first_name {
        Some(v) => required(v, "firstName", 100)?,
        None => current.first_name.clone(),
    };
    let last_name = match &patch.last_name {
        Some(v) => required(v, "lastName", 100)?,
        None => current.last_name.clone(),
    };
    let parent_phone = match &patch.parent_phone {
        Some(v) => required(v, "parentPhone", 15)?,
        None => current.parent_phone.clone(),
    };
    let date_of_birth = match &patch.date_of_birth {
        Some(v) => check_birth_date(v.as_deref())?,
        None => current.date_of_birth.clone(),
    };
    let parent_email = match &patch.parent_email {
        Some(v) => check_email(v.as_deref())?,
        None => current.parent_email.clone(),
    };
    let class_id = match &patch.class_id {
        Some(v) => check_class(conn, v.as_deref())?,
        None => current.class_id.clone(),
    };

    conn.execute(
        "UPDATE students SET
            admission_number = ?, first_name = ?, last_name = ?, date_of_birth = ?,
            class_id = ?, parent_phone = ?, parent_email = ?, updated_at = ?
         WHERE id = ?",
        (
            &admission_number,
            &first_name,
            &last_name,
            &date_of_birth,
            &class_id,
            &parent_phone,
            &parent_email,
            now_ts(),
            id,
        ),
    )
    .map_err(|e| map_insert_err(e, &admission_number))?;
    get_student(conn, id)
}

/// Links (or with `None`, unlinks) the portal login of a student.
pub fn link_user(conn: &Connection, student_id: &str, user_id: Option<&str>) -> AppResult<Student> {
    get_student(conn, student_id)?;
    if let Some(uid) = user_id {
        let user = crate::access::get_user(conn, uid)?;
        if user.role != crate::access::Role::Student {
            return Err(AppError::validation(
                "only STUDENT users can be linked to a student profile",
            ));
        }
    }
    conn.execute(
        "UPDATE students SET user_id = ?, updated_at = ? WHERE id = ?",
        (user_id, now_ts(), student_id),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::validation("user is already linked to another student")
        } else {
            AppError::from(e)
        }
    })?;
    get_student(conn, student_id)
}

/// Removes a student who never had a ledger entry. Students with financial
/// history are kept; move them out of their class instead.
pub fn delete_student(conn: &Connection, id: &str) -> AppResult<Student> {
    let student = get_student(conn, id)?;
    let entries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ledger_entries WHERE student_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if entries > 0 {
        return Err(AppError::validation(format!(
            "{} has {} ledger entries and cannot be deleted",
            student.display(),
            entries
        )));
    }
    conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    Ok(student)
}

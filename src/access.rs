//! Users, roles and the permission checks the request handlers apply.

use crate::db::{now_ts, unknown_variant};
use crate::error::{is_unique_violation, AppError, AppResult};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Bursar,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "BURSAR" => Some(Self::Bursar),
            "TEACHER" => Some(Self::Teacher),
            "PARENT" => Some(Self::Parent),
            "STUDENT" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Bursar => "BURSAR",
            Self::Teacher => "TEACHER",
            Self::Parent => "PARENT",
            Self::Student => "STUDENT",
        }
    }

    pub fn is_portal(self) -> bool {
        matches!(self, Self::Parent | Self::Student)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ManageUsers,
    ManageAcademic,
    ManageStudents,
    ViewStudents,
    ManageFinance,
    ViewAudit,
    ViewNotifications,
    ManageBackup,
    Portal,
}

impl Permission {
    fn allows(self, role: Role) -> bool {
        use Role::*;
        match self {
            Self::ManageUsers
            | Self::ManageAcademic
            | Self::ManageStudents
            | Self::ViewAudit
            | Self::ViewNotifications
            | Self::ManageBackup => role == Admin,
            Self::ManageFinance => matches!(role, Admin | Bursar),
            Self::ViewStudents => matches!(role, Admin | Bursar | Teacher),
            Self::Portal => role.is_portal(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::ManageUsers => "manage users",
            Self::ManageAcademic => "manage academic structure",
            Self::ManageStudents => "manage students",
            Self::ViewStudents => "view students",
            Self::ManageFinance => "manage finances",
            Self::ViewAudit => "view the audit log",
            Self::ViewNotifications => "view the notification log",
            Self::ManageBackup => "manage backups",
            Self::Portal => "use the portal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: bool,
}

impl User {
    pub fn require(&self, perm: Permission) -> AppResult<()> {
        if perm.allows(self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} ({}) may not {}",
                self.username,
                self.role.as_str(),
                perm.label()
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub role: Role,
    pub phone: Option<String>,
    pub email: Option<String>,
}

const USER_COLUMNS: &str = "id, username, role, phone, email, active";

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = r.get(2)?;
    Ok(User {
        id: r.get(0)?,
        username: r.get(1)?,
        role: Role::parse(&role).ok_or_else(|| unknown_variant(2, "role", &role))?,
        phone: r.get(3)?,
        email: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
    })
}

/// Looks up the actor a request names; unknown and deactivated users are rejected.
pub fn resolve_actor(conn: &Connection, username: &str) -> AppResult<User> {
    let user = find_user_by_username(conn, username)?
        .ok_or_else(|| AppError::Unauthenticated(username.to_string()))?;
    if !user.active {
        return Err(AppError::Unauthenticated(username.to_string()));
    }
    Ok(user)
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> AppResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
    Ok(conn
        .query_row(&sql, [username.trim()], user_from_row)
        .optional()?)
}

pub fn get_user(conn: &Connection, id: &str) -> AppResult<User> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    conn.query_row(&sql, [id], user_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("user", id))
}

pub fn count_users(conn: &Connection) -> AppResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
}

pub fn create_user(conn: &Connection, new: &NewUser) -> AppResult<User> {
    let username = new.username.trim();
    if username.is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    if username.len() > 150 {
        return Err(AppError::validation("username length must be <= 150"));
    }
    let id = Uuid::new_v4().to_string();
    let phone = new.phone.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let email = new.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
    conn.execute(
        "INSERT INTO users(id, username, role, phone, email, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&id, username, new.role.as_str(), phone, email, now_ts()),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::validation(format!("username already taken: {}", username))
        } else {
            AppError::from(e)
        }
    })?;
    get_user(conn, &id)
}

/// Creates the first administrator. Only succeeds on an empty user table.
pub fn bootstrap_admin(conn: &Connection, username: &str) -> AppResult<User> {
    let tx = conn.unchecked_transaction()?;
    if count_users(&tx)? > 0 {
        return Err(AppError::Forbidden(
            "users already exist; ask an administrator for an account".into(),
        ));
    }
    let user = create_user(
        &tx,
        &NewUser {
            username: username.to_string(),
            role: Role::Admin,
            phone: None,
            email: None,
        },
    )?;
    tx.commit()?;
    Ok(user)
}

pub fn list_users(conn: &Connection, role: Option<Role>) -> AppResult<Vec<User>> {
    let sql = format!(
        "SELECT {} FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY username",
        USER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([role.map(Role::as_str)], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_user_active(conn: &Connection, id: &str, active: bool) -> AppResult<User> {
    let changed = conn.execute(
        "UPDATE users SET active = ? WHERE id = ?",
        (active as i64, id),
    )?;
    if changed == 0 {
        return Err(AppError::not_found("user", id));
    }
    get_user(conn, id)
}

/// Whether a portal user may see the given student: students see the
/// profile linked to their login, parents see children whose recorded
/// parent phone or email matches theirs.
pub fn portal_can_view(conn: &Connection, user: &User, student_id: &str) -> AppResult<bool> {
    match user.role {
        Role::Student => {
            let linked: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM students WHERE id = ? AND user_id = ?",
                    (student_id, &user.id),
                    |r| r.get(0),
                )
                .optional()?;
            Ok(linked.is_some())
        }
        Role::Parent => {
            if user.phone.is_none() && user.email.is_none() {
                return Ok(false);
            }
            let matched: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM students
                     WHERE id = ?1
                       AND ((?2 IS NOT NULL AND parent_phone = ?2)
                         OR (?3 IS NOT NULL AND parent_email IS NOT NULL
                             AND lower(parent_email) = lower(?3)))",
                    (student_id, &user.phone, &user.email),
                    |r| r.get(0),
                )
                .optional()?;
            Ok(matched.is_some())
        }
        _ => Ok(false),
    }
}

/// Students a portal user is allowed to see, by id.
pub fn portal_student_ids(conn: &Connection, user: &User) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM students
         WHERE (?1 = 'STUDENT' AND user_id = ?2)
            OR (?1 = 'PARENT'
                AND ((?3 IS NOT NULL AND parent_phone = ?3)
                  OR (?4 IS NOT NULL AND parent_email IS NOT NULL
                      AND lower(parent_email) = lower(?4))))
         ORDER BY last_name, first_name",
    )?;
    let ids = stmt
        .query_map(
            (user.role.as_str(), &user.id, &user.phone, &user.email),
            |r| r.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;

    fn user(conn: &Connection, name: &str, role: Role) -> User {
        create_user(
            conn,
            &NewUser {
                username: name.into(),
                role,
                phone: None,
                email: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn bootstrap_only_on_empty_table() {
        let conn = open_memory();
        let admin = bootstrap_admin(&conn, "root").unwrap();
        assert_eq!(admin.role, Role::Admin);
        let again = bootstrap_admin(&conn, "other");
        assert!(matches!(again, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn unknown_stored_role_is_an_error() {
        let conn = open_memory();
        conn.execute_batch(
            "PRAGMA ignore_check_constraints = ON;
             INSERT INTO users(id, username, role, active, created_at)
             VALUES('u1', 'janitor', 'JANITOR', 1, '2026-01-05T00:00:00.000Z');",
        )
        .unwrap();
        assert!(matches!(
            resolve_actor(&conn, "janitor"),
            Err(AppError::Persistence(_))
        ));
    }

    #[test]
    fn role_matrix() {
        let conn = open_memory();
        let bursar = user(&conn, "bursar", Role::Bursar);
        let teacher = user(&conn, "teacher", Role::Teacher);
        let parent = user(&conn, "parent", Role::Parent);

        assert!(bursar.require(Permission::ManageFinance).is_ok());
        assert!(bursar.require(Permission::ViewStudents).is_ok());
        assert!(bursar.require(Permission::ManageUsers).is_err());
        assert!(bursar.require(Permission::ViewAudit).is_err());
        assert!(teacher.require(Permission::ViewStudents).is_ok());
        assert!(teacher.require(Permission::ManageFinance).is_err());
        assert!(parent.require(Permission::Portal).is_ok());
        assert!(parent.require(Permission::ViewStudents).is_err());
    }

    #[test]
    fn inactive_actor_is_rejected() {
        let conn = open_memory();
        let t = user(&conn, "teacher", Role::Teacher);
        assert!(resolve_actor(&conn, "teacher").is_ok());
        set_user_active(&conn, &t.id, false).unwrap();
        assert!(matches!(
            resolve_actor(&conn, "teacher"),
            Err(AppError::Unauthenticated(_))
        ));
        assert!(matches!(
            resolve_actor(&conn, "nobody"),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn duplicate_username_is_a_validation_error() {
        let conn = open_memory();
        user(&conn, "dup", Role::Teacher);
        let res = create_user(
            &conn,
            &NewUser {
                username: "dup".into(),
                role: Role::Bursar,
                phone: None,
                email: None,
            },
        );
        assert!(matches!(res, Err(AppError::Validation(_))));
    }
}

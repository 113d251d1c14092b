//! Fee schedules: what each class owes per term, before it is invoiced.

use crate::db::now_ts;
use crate::error::{AppError, AppResult};
use crate::money::Money;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSchedule {
    pub id: String,
    pub term_id: String,
    pub term_name: String,
    pub session_name: String,
    pub class_id: String,
    pub class_name: String,
    pub amount: Money,
    pub description: String,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFeeSchedules {
    pub term_id: String,
    pub class_ids: Vec<String>,
    pub amount: Money,
    pub description: String,
    pub due_date: Option<String>,
}

const FEE_SELECT: &str = "SELECT f.id, f.term_id, t.name, s.name, f.class_id, c.name,
       f.amount_cents, f.description, f.due_date
     FROM fee_schedules f
     JOIN terms t ON t.id = f.term_id
     JOIN academic_sessions s ON s.id = t.session_id
     JOIN classes c ON c.id = f.class_id";

fn fee_from_row(r: &Row<'_>) -> rusqlite::Result<FeeSchedule> {
    Ok(FeeSchedule {
        id: r.get(0)?,
        term_id: r.get(1)?,
        term_name: r.get(2)?,
        session_name: r.get(3)?,
        class_id: r.get(4)?,
        class_name: r.get(5)?,
        amount: Money::from_cents(r.get(6)?),
        description: r.get(7)?,
        due_date: r.get(8)?,
    })
}

/// Creates one schedule per class for the same term, amount and
/// description. All or nothing.
pub fn create_fee_schedules(conn: &Connection, new: &NewFeeSchedules) -> AppResult<Vec<FeeSchedule>> {
    if !new.amount.is_positive() {
        return Err(AppError::validation("amount must be greater than zero"));
    }
    let description = new.description.trim();
    if description.is_empty() {
        return Err(AppError::validation("description must not be empty"));
    }
    if description.chars().count() > 200 {
        return Err(AppError::validation("description length must be <= 200"));
    }
    let due_date = match new.due_date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(d) => {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| AppError::validation("dueDate must be YYYY-MM-DD"))?;
            Some(d.to_string())
        }
        None => None,
    };
    if new.class_ids.is_empty() {
        return Err(AppError::validation("classIds must not be empty"));
    }
    crate::academic::get_term(conn, &new.term_id)?;

    let tx = conn.unchecked_transaction()?;
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(new.class_ids.len());
    for class_id in &new.class_ids {
        if !seen.insert(class_id.as_str()) {
            continue;
        }
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(AppError::not_found("class", class_id.as_str()));
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO fee_schedules(id, term_id, class_id, amount_cents, description, due_date, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &new.term_id,
                class_id,
                new.amount.cents(),
                description,
                &due_date,
                now_ts(),
            ),
        )?;
        ids.push(id);
    }
    tx.commit()?;

    ids.iter().map(|id| get_fee_schedule(conn, id)).collect()
}

pub fn get_fee_schedule(conn: &Connection, id: &str) -> AppResult<FeeSchedule> {
    let sql = format!("{} WHERE f.id = ?", FEE_SELECT);
    conn.query_row(&sql, [id], fee_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("fee schedule", id))
}

pub fn list_fee_schedules(
    conn: &Connection,
    term_id: Option<&str>,
    class_id: Option<&str>,
) -> AppResult<Vec<FeeSchedule>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR f.term_id = ?1) AND (?2 IS NULL OR f.class_id = ?2)
         ORDER BY s.name DESC, t.name DESC, c.name, f.created_at",
        FEE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((term_id, class_id), fee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::academic::{create_class, create_session, create_term};
    use crate::db::open_memory;

    #[test]
    fn bulk_creation_makes_one_schedule_per_class() {
        let conn = open_memory();
        let s = create_session(&conn, "2026/2027", true).unwrap();
        let t = create_term(&conn, &s.id, "Term 1", true).unwrap();
        let f1 = create_class(&conn, "Form 1").unwrap();
        let f2 = create_class(&conn, "Form 2").unwrap();

        let created = create_fee_schedules(
            &conn,
            &NewFeeSchedules {
                term_id: t.id.clone(),
                class_ids: vec![f1.id.clone(), f2.id.clone(), f1.id.clone()],
                amount: Money::parse("10000").unwrap(),
                description: "Tuition Term 1".into(),
                due_date: Some("2026-02-01".into()),
            },
        )
        .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|f| f.amount.cents() == 1_000_000));
        assert_eq!(list_fee_schedules(&conn, Some(t.id.as_str()), None).unwrap().len(), 2);
        assert_eq!(list_fee_schedules(&conn, None, Some(f2.id.as_str())).unwrap().len(), 1);
    }

    #[test]
    fn unknown_class_rolls_back_the_batch() {
        let conn = open_memory();
        let s = create_session(&conn, "2026/2027", true).unwrap();
        let t = create_term(&conn, &s.id, "Term 1", true).unwrap();
        let f1 = create_class(&conn, "Form 1").unwrap();

        let res = create_fee_schedules(
            &conn,
            &NewFeeSchedules {
                term_id: t.id.clone(),
                class_ids: vec![f1.id.clone(), "missing".into()],
                amount: Money::parse("500").unwrap(),
                description: "Levy".into(),
                due_date: None,
            },
        );
        assert!(matches!(res, Err(AppError::NotFound { .. })));
        assert!(list_fee_schedules(&conn, None, None).unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_amount_and_bad_due_date() {
        let conn = open_memory();
        let base = NewFeeSchedules {
            term_id: "t".into(),
            class_ids: vec!["c".into()],
            amount: Money::ZERO,
            description: "Levy".into(),
            due_date: None,
        };
        assert!(matches!(
            create_fee_schedules(&conn, &base),
            Err(AppError::Validation(_))
        ));
        let bad_date = NewFeeSchedules {
            amount: Money::parse("1").unwrap(),
            due_date: Some("next week".into()),
            ..base
        };
        assert!(matches!(
            create_fee_schedules(&conn, &bad_date),
            Err(AppError::Validation(_))
        ));
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_iso, param_bool, param_opt_str, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_row_json(r: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentNo": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "department": r.get::<_, String>(3)?,
        "semester": r.get::<_, String>(4)?,
        "email": r.get::<_, String>(5)?,
        "phone": r.get::<_, Option<String>>(6)?,
        "active": r.get::<_, i64>(7)? != 0,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, String>(9)?,
    }))
}

const STUDENT_COLUMNS: &str =
    "id, student_no, name, department, semester, email, phone, active, created_at, updated_at";

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_no = match param_str(&req.params, "studentNo") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentNo", None),
    };
    let name = match param_str(&req.params, "name") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let department = match param_str(&req.params, "department") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing department", None),
    };
    let semester = match param_str(&req.params, "semester") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing semester", None),
    };
    let email = match param_str(&req.params, "email") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let phone = param_opt_str(&req.params, "phone");

    let existing: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM students WHERE student_no = ? OR email = ?",
            (&student_no, &email),
            |r| r.get(0),
        )
        .optional();
    match existing {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_student",
                "student number or email already exists",
                Some(json!({ "studentNo": student_no, "email": email })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    let now = now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, student_no, name, department, semester, email, phone, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        rusqlite::params![
            &student_id,
            &student_no,
            &name,
            &department,
            &semester,
            &email,
            &phone,
            &now,
            &now
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY created_at DESC, id",
        STUDENT_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| student_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(&req.params, "studentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [&student_id],
            |r| student_row_json(r),
        )
        .optional();
    match row {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(&req.params, "studentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let current = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [&student_id],
            |r| student_row_json(r),
        )
        .optional();
    let current = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let pick = |key: &str| -> String {
        param_opt_str(&req.params, key)
            .or_else(|| current.get(key).and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default()
    };
    let student_no = pick("studentNo");
    let name = pick("name");
    let department = pick("department");
    let semester = pick("semester");
    let email = pick("email");
    let phone = param_opt_str(&req.params, "phone")
        .or_else(|| current.get("phone").and_then(|v| v.as_str()).map(str::to_string));
    let active = param_bool(&req.params, "active")
        .unwrap_or_else(|| current.get("active").and_then(|v| v.as_bool()).unwrap_or(true));

    let clash: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM students WHERE (student_no = ? OR email = ?) AND id != ?",
            (&student_no, &email, &student_id),
            |r| r.get(0),
        )
        .optional();
    match clash {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_student",
                "student number or email already exists",
                Some(json!({ "studentNo": student_no, "email": email })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE students
         SET student_no = ?, name = ?, department = ?, semester = ?, email = ?,
             phone = ?, active = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &student_no,
            &name,
            &department,
            &semester,
            &email,
            &phone,
            active as i64,
            now_iso(),
            &student_id
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn delete_student_with_results(
    conn: &Connection,
    student_row_id: &str,
    student_no: &str,
) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    // Results are keyed by the institutional student number.
    tx.execute(
        "DELETE FROM result_subjects
         WHERE result_id IN (SELECT id FROM results WHERE student_id = ?)",
        [student_no],
    )?;
    tx.execute("DELETE FROM results WHERE student_id = ?", [student_no])?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_row_id])?;
    tx.commit()
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(&req.params, "studentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let student_no: Result<Option<String>, _> = conn
        .query_row(
            "SELECT student_no FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional();
    let student_no = match student_no {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match delete_student_with_results(conn, &student_id, &student_no) {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_students_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let totals: Result<(i64, i64), _> = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM students",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    );
    let (total, active) = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let distinct = |column: &str| -> Result<Vec<String>, rusqlite::Error> {
        let sql = format!(
            "SELECT DISTINCT {} FROM students ORDER BY {}",
            column, column
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    };
    let departments = match distinct("department") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let semesters = match distinct("semester") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "totalStudents": total,
            "activeStudents": active,
            "inactiveStudents": total - active,
            "departments": departments,
            "semesters": semesters,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.stats" => Some(handle_students_stats(state, req)),
        _ => None,
    }
}

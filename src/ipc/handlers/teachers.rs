use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_iso, param_bool, param_opt_str, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const TEACHER_COLUMNS: &str = "id, teacher_no, name, department, email, phone, qualification, \
                               experience_years, active, created_at, updated_at";

fn teacher_row_json(r: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "teacherNo": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "department": r.get::<_, String>(3)?,
        "email": r.get::<_, String>(4)?,
        "phone": r.get::<_, Option<String>>(5)?,
        "qualification": r.get::<_, Option<String>>(6)?,
        "experienceYears": r.get::<_, i64>(7)?,
        "active": r.get::<_, i64>(8)? != 0,
        "createdAt": r.get::<_, String>(9)?,
        "updatedAt": r.get::<_, String>(10)?,
    }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_no = match param_str(&req.params, "teacherNo") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherNo", None),
    };
    let name = match param_str(&req.params, "name") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let department = match param_str(&req.params, "department") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing department", None),
    };
    let email = match param_str(&req.params, "email") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let phone = param_opt_str(&req.params, "phone");
    let qualification = param_opt_str(&req.params, "qualification");
    let experience_years = req
        .params
        .get("experienceYears")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if experience_years < 0 {
        return err(
            &req.id,
            "bad_params",
            "experienceYears must not be negative",
            Some(json!({ "experienceYears": experience_years })),
        );
    }

    let existing: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM teachers WHERE teacher_no = ? OR email = ?",
            (&teacher_no, &email),
            |r| r.get(0),
        )
        .optional();
    match existing {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_teacher",
                "teacher number or email already exists",
                Some(json!({ "teacherNo": teacher_no, "email": email })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let teacher_id = Uuid::new_v4().to_string();
    let now = now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, teacher_no, name, department, email, phone, qualification,
                              experience_years, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        rusqlite::params![
            &teacher_id,
            &teacher_no,
            &name,
            &department,
            &email,
            &phone,
            &qualification,
            experience_years,
            &now,
            &now
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    // activeOnly narrows to teaching staff still on the roster.
    let active_only = param_bool(&req.params, "activeOnly").unwrap_or(false);
    let sql = if active_only {
        format!(
            "SELECT {} FROM teachers WHERE active = 1 ORDER BY created_at DESC, id",
            TEACHER_COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM teachers ORDER BY created_at DESC, id",
            TEACHER_COLUMNS
        )
    };

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| teacher_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match param_str(&req.params, "teacherId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let row = conn
        .query_row(
            &format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLUMNS),
            [&teacher_id],
            |r| teacher_row_json(r),
        )
        .optional();
    match row {
        Ok(Some(teacher)) => ok(&req.id, json!({ "teacher": teacher })),
        Ok(None) => err(&req.id, "not_found", "teacher not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match param_str(&req.params, "teacherId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let current = conn
        .query_row(
            &format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLUMNS),
            [&teacher_id],
            |r| teacher_row_json(r),
        )
        .optional();
    let current = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let pick = |key: &str| -> String {
        param_opt_str(&req.params, key)
            .or_else(|| current.get(key).and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default()
    };
    let teacher_no = pick("teacherNo");
    let name = pick("name");
    let department = pick("department");
    let email = pick("email");
    let phone = param_opt_str(&req.params, "phone")
        .or_else(|| current.get("phone").and_then(|v| v.as_str()).map(str::to_string));
    let qualification = param_opt_str(&req.params, "qualification").or_else(|| {
        current
            .get("qualification")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });
    let experience_years = req
        .params
        .get("experienceYears")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| {
            current
                .get("experienceYears")
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        });
    let active = param_bool(&req.params, "active")
        .unwrap_or_else(|| current.get("active").and_then(|v| v.as_bool()).unwrap_or(true));

    let clash: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM teachers WHERE (teacher_no = ? OR email = ?) AND id != ?",
            (&teacher_no, &email, &teacher_id),
            |r| r.get(0),
        )
        .optional();
    match clash {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_teacher",
                "teacher number or email already exists",
                Some(json!({ "teacherNo": teacher_no, "email": email })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE teachers
         SET teacher_no = ?, name = ?, department = ?, email = ?, phone = ?,
             qualification = ?, experience_years = ?, active = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &teacher_no,
            &name,
            &department,
            &email,
            &phone,
            &qualification,
            experience_years,
            active as i64,
            now_iso(),
            &teacher_id
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match param_str(&req.params, "teacherId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let changed = match conn.execute(
        "UPDATE teachers SET active = 0, updated_at = ? WHERE id = ?",
        rusqlite::params![now_iso(), &teacher_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }
    ok(&req.id, json!({ "teacherId": teacher_id, "active": false }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match param_str(&req.params, "teacherId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let changed = match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_teachers_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let totals: Result<(i64, i64), _> = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM teachers",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    );
    let (total, active) = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let departments: Result<Vec<String>, _> = conn
        .prepare("SELECT DISTINCT department FROM teachers ORDER BY department")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()
        });
    let departments = match departments {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "totalTeachers": total,
            "activeTeachers": active,
            "inactiveTeachers": total - active,
            "departments": departments,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.get" => Some(handle_teachers_get(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.deactivate" => Some(handle_teachers_deactivate(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.stats" => Some(handle_teachers_stats(state, req)),
        _ => None,
    }
}

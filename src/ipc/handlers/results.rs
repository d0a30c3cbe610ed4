use crate::grading::{self, ExamType, SubjectEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_iso, param_bool, param_opt_str, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Result metadata as supplied by the caller. Derived fields are never
/// read from params; both write paths funnel through `grading::compute`.
struct ResultInput {
    student_id: String,
    student_name: String,
    department: String,
    semester: String,
    exam_type: ExamType,
    exam_date: String,
    published: bool,
    subjects: Vec<SubjectEntry>,
}

fn parse_result_input(params: &serde_json::Value) -> Result<ResultInput, serde_json::Value> {
    let field = |key: &str| -> Result<String, serde_json::Value> {
        param_str(params, key).ok_or_else(|| {
            json!({ "code": "bad_params", "message": format!("missing {}", key) })
        })
    };

    let student_id = field("studentId")?;
    let student_name = field("studentName")?;
    let department = field("department")?;
    let semester = field("semester")?;

    let exam_type = match param_opt_str(params, "examType") {
        None => ExamType::default(),
        Some(raw) => ExamType::parse(&raw).ok_or_else(|| {
            json!({
                "code": "bad_params",
                "message": "examType must be one of: Regular, Supplementary, Improvement",
                "details": { "examType": raw }
            })
        })?,
    };
    let exam_date = param_opt_str(params, "examDate").unwrap_or_else(now_iso);
    let published = param_bool(params, "published").unwrap_or(false);

    let subjects: Vec<SubjectEntry> = match params.get("subjects") {
        None => Vec::new(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            json!({
                "code": "bad_params",
                "message": format!("invalid subjects: {}", e)
            })
        })?,
    };

    Ok(ResultInput {
        student_id,
        student_name,
        department,
        semester,
        exam_type,
        exam_date,
        published,
        subjects,
    })
}

fn bad_input(id: &str, e: serde_json::Value) -> serde_json::Value {
    let code = e
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("bad_params")
        .to_string();
    let message = e
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("invalid params")
        .to_string();
    err(id, &code, message, e.get("details").cloned())
}

fn result_to_json(conn: &Connection, result_id: &str) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    let row = conn
        .query_row(
            "SELECT id, student_id, student_name, department, semester, exam_type,
                    exam_date, published, total_marks, obtained_marks, percentage,
                    cgpa, grade, status, created_at, updated_at
             FROM results
             WHERE id = ?",
            [result_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "studentName": r.get::<_, String>(2)?,
                    "department": r.get::<_, String>(3)?,
                    "semester": r.get::<_, String>(4)?,
                    "examType": r.get::<_, String>(5)?,
                    "examDate": r.get::<_, String>(6)?,
                    "published": r.get::<_, i64>(7)? != 0,
                    "totalMarks": r.get::<_, i64>(8)?,
                    "obtainedMarks": r.get::<_, i64>(9)?,
                    "percentage": r.get::<_, f64>(10)?,
                    "cgpa": r.get::<_, f64>(11)?,
                    "grade": r.get::<_, String>(12)?,
                    "status": r.get::<_, String>(13)?,
                    "createdAt": r.get::<_, String>(14)?,
                    "updatedAt": r.get::<_, String>(15)?,
                }))
            },
        )
        .optional()?;

    let Some(mut value) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT subject_name, subject_code, marks, credit, grade
         FROM result_subjects
         WHERE result_id = ?
         ORDER BY idx",
    )?;
    let subjects: Vec<serde_json::Value> = stmt
        .query_map([result_id], |r| {
            Ok(json!({
                "subjectName": r.get::<_, String>(0)?,
                "subjectCode": r.get::<_, String>(1)?,
                "marks": r.get::<_, i64>(2)?,
                "credit": r.get::<_, i64>(3)?,
                "grade": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    value["subjects"] = json!(subjects);
    Ok(Some(value))
}

fn replace_subject_rows(
    tx: &rusqlite::Transaction<'_>,
    result_id: &str,
    subjects: &[grading::GradedSubject],
) -> Result<(), rusqlite::Error> {
    tx.execute(
        "DELETE FROM result_subjects WHERE result_id = ?",
        [result_id],
    )?;
    for (idx, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO result_subjects(id, result_id, idx, subject_name, subject_code, marks, credit, grade)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                result_id,
                idx as i64,
                s.subject_name.trim(),
                s.subject_code.trim(),
                s.marks,
                s.credit,
                s.grade.as_str(),
            ),
        )?;
    }
    Ok(())
}

fn handle_results_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let input = match parse_result_input(&req.params) {
        Ok(v) => v,
        Err(e) => return bad_input(&req.id, e),
    };

    // The (studentId, semester) pair is unique; check before computing so
    // the caller gets the duplicate message rather than a constraint error.
    let existing: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM results WHERE student_id = ? AND semester = ?",
            (&input.student_id, &input.semester),
            |r| r.get(0),
        )
        .optional();
    match existing {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_result",
                "result already exists for this student and semester",
                Some(json!({
                    "studentId": input.student_id,
                    "semester": input.semester
                })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let computed = match grading::compute(input.subjects) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let result_id = Uuid::new_v4().to_string();
    let now = now_iso();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO results(id, student_id, student_name, department, semester,
                             exam_type, exam_date, published, total_marks, obtained_marks,
                             percentage, cgpa, grade, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &result_id,
            &input.student_id,
            &input.student_name,
            &input.department,
            &input.semester,
            input.exam_type.as_str(),
            &input.exam_date,
            input.published as i64,
            computed.total_marks,
            computed.obtained_marks,
            computed.percentage,
            computed.cgpa,
            computed.grade.as_str(),
            computed.status.as_str(),
            &now,
            &now,
        ],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    if let Err(e) = replace_subject_rows(&tx, &result_id, &computed.subjects) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "result_subjects" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match result_to_json(conn, &result_id) {
        Ok(Some(value)) => ok(&req.id, json!({ "result": value })),
        Ok(None) => err(&req.id, "not_found", "result vanished after insert", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let result_id = match param_str(&req.params, "resultId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing resultId", None),
    };

    let input = match parse_result_input(&req.params) {
        Ok(v) => v,
        Err(e) => return bad_input(&req.id, e),
    };

    let current: Result<Option<String>, _> = conn
        .query_row("SELECT id FROM results WHERE id = ?", [&result_id], |r| {
            r.get(0)
        })
        .optional();
    match current {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "result not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Moving the record onto another student/semester must not collide
    // with an existing result.
    let clash: Result<Option<String>, _> = conn
        .query_row(
            "SELECT id FROM results WHERE student_id = ? AND semester = ? AND id != ?",
            (&input.student_id, &input.semester, &result_id),
            |r| r.get(0),
        )
        .optional();
    match clash {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_result",
                "result already exists for this student and semester",
                Some(json!({
                    "studentId": input.student_id,
                    "semester": input.semester
                })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Full recompute from the replacement subjects; no delta path exists.
    let computed = match grading::compute(input.subjects) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let now = now_iso();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE results
         SET student_id = ?, student_name = ?, department = ?, semester = ?,
             exam_type = ?, exam_date = ?, published = ?, total_marks = ?,
             obtained_marks = ?, percentage = ?, cgpa = ?, grade = ?, status = ?,
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &input.student_id,
            &input.student_name,
            &input.department,
            &input.semester,
            input.exam_type.as_str(),
            &input.exam_date,
            input.published as i64,
            computed.total_marks,
            computed.obtained_marks,
            computed.percentage,
            computed.cgpa,
            computed.grade.as_str(),
            computed.status.as_str(),
            &now,
            &result_id,
        ],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }

    if let Err(e) = replace_subject_rows(&tx, &result_id, &computed.subjects) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "result_subjects" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match result_to_json(conn, &result_id) {
        Ok(Some(value)) => ok(&req.id, json!({ "result": value })),
        Ok(None) => err(&req.id, "not_found", "result not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let result_id = match param_str(&req.params, "resultId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing resultId", None),
    };
    let published = match param_bool(&req.params, "published") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing published", None),
    };

    // Publish toggles visibility only; derived fields stay as computed.
    let changed = match conn.execute(
        "UPDATE results SET published = ?, updated_at = ? WHERE id = ?",
        rusqlite::params![published as i64, now_iso(), &result_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    if changed == 0 {
        return err(&req.id, "not_found", "result not found", None);
    }
    ok(&req.id, json!({ "resultId": result_id, "published": published }))
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match param_str(&req.params, "resultId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing resultId", None),
    };
    match result_to_json(conn, &result_id) {
        Ok(Some(value)) => ok(&req.id, json!({ "result": value })),
        Ok(None) => err(&req.id, "not_found", "result not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn list_results_where(
    conn: &Connection,
    where_sql: &str,
    binds: &[&dyn rusqlite::ToSql],
    order_sql: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let sql = format!("SELECT id FROM results {} {}", where_sql, order_sql);
    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = stmt
        .query_map(binds, |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(value) = result_to_json(conn, &id)? {
            out.push(value);
        }
    }
    Ok(out)
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };
    match list_results_where(conn, "", &[], "ORDER BY created_at DESC, id") {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match param_str(&req.params, "studentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    match list_results_where(
        conn,
        "WHERE student_id = ?",
        &[&student_id],
        "ORDER BY semester, id",
    ) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_by_semester(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let semester = match param_str(&req.params, "semester") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing semester", None),
    };
    match list_results_where(
        conn,
        "WHERE semester = ?",
        &[&semester],
        "ORDER BY student_id, id",
    ) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_by_department(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let department = match param_str(&req.params, "department") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing department", None),
    };
    match list_results_where(
        conn,
        "WHERE department = ?",
        &[&department],
        "ORDER BY semester, student_id",
    ) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let query = match param_str(&req.params, "query") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing query", None),
    };
    let needle = format!("%{}%", query);
    match list_results_where(
        conn,
        "WHERE student_id LIKE ?1 COLLATE NOCASE
            OR student_name LIKE ?1 COLLATE NOCASE
            OR department LIKE ?1 COLLATE NOCASE
            OR semester LIKE ?1 COLLATE NOCASE",
        &[&needle],
        "ORDER BY created_at DESC, id",
    ) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result_id = match param_str(&req.params, "resultId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing resultId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM result_subjects WHERE result_id = ?",
        [&result_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let changed = match tx.execute("DELETE FROM results WHERE id = ?", [&result_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if changed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "result not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_results_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let totals: Result<(i64, i64, i64), _> = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(published), 0),
                COALESCE(SUM(CASE WHEN status = 'Pass' THEN 1 ELSE 0 END), 0)
         FROM results",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    );
    let (total, published, passed) = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let distinct = |column: &str| -> Result<Vec<String>, rusqlite::Error> {
        let sql = format!(
            "SELECT DISTINCT {} FROM results ORDER BY {}",
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

    let pass_percentage = if total > 0 {
        crate::grading::round2(100.0 * passed as f64 / total as f64)
    } else {
        0.0
    };

    ok(
        &req.id,
        json!({
            "totalResults": total,
            "publishedResults": published,
            "unpublishedResults": total - published,
            "passPercentage": pass_percentage,
            "departments": departments,
            "semesters": semesters,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.create" => Some(handle_results_create(state, req)),
        "results.update" => Some(handle_results_update(state, req)),
        "results.publish" => Some(handle_results_publish(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.byStudent" => Some(handle_results_by_student(state, req)),
        "results.bySemester" => Some(handle_results_by_semester(state, req)),
        "results.byDepartment" => Some(handle_results_by_department(state, req)),
        "results.search" => Some(handle_results_search(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        "results.stats" => Some(handle_results_stats(state, req)),
        _ => None,
    }
}

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_edumanaged");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn edumanaged");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn student_lifecycle_with_result_cascade() {
    let workspace = temp_dir("edumanage-students");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNo": "STU-100",
            "name": "Anisur Rahman",
            "department": "CSE",
            "semester": "2nd",
            "email": "anis@example.edu",
            "phone": "01700000000"
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();

    // Duplicate number or email is rejected.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "studentNo": "STU-100",
            "name": "Someone Else",
            "department": "EEE",
            "semester": "1st",
            "email": "else@example.edu"
        }),
    );
    assert_eq!(error["code"], json!("duplicate_student"));

    // Partial update keeps unspecified fields.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({ "studentId": student_id, "semester": "3rd" }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(fetched["student"]["semester"], json!("3rd"));
    assert_eq!(fetched["student"]["name"], json!("Anisur Rahman"));
    assert_eq!(fetched["student"]["email"], json!("anis@example.edu"));

    // A result recorded under the institutional number...
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.create",
        json!({
            "studentId": "STU-100",
            "studentName": "Anisur Rahman",
            "department": "CSE",
            "semester": "3rd",
            "subjects": [
                { "subjectName": "Discrete Math", "subjectCode": "CSE-203", "marks": 77, "credit": 3 }
            ]
        }),
    );

    // ...is removed together with the student profile.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let results = request_ok(&mut stdin, &mut reader, "8", "results.list", json!({}));
    assert_eq!(results["results"], json!([]));
    let students = request_ok(&mut stdin, &mut reader, "9", "students.list", json!({}));
    assert_eq!(students["students"], json!([]));

    let _ = child.kill();
}

#[test]
fn student_stats_split_active_and_inactive() {
    let workspace = temp_dir("edumanage-student-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentNo": "STU-201",
            "name": "One",
            "department": "CSE",
            "semester": "1st",
            "email": "one@example.edu"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "studentNo": "STU-202",
            "name": "Two",
            "department": "BBA",
            "semester": "2nd",
            "email": "two@example.edu"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({
            "studentId": first["studentId"].as_str().expect("id"),
            "active": false
        }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "5", "students.stats", json!({}));
    assert_eq!(stats["totalStudents"], json!(2));
    assert_eq!(stats["activeStudents"], json!(1));
    assert_eq!(stats["inactiveStudents"], json!(1));
    assert_eq!(stats["departments"], json!(["BBA", "CSE"]));

    let _ = child.kill();
}

#[test]
fn teacher_lifecycle_and_stats() {
    let workspace = temp_dir("edumanage-teachers");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({
            "teacherNo": "TCH-01",
            "name": "Dr. Salma Khatun",
            "department": "CSE",
            "email": "salma@example.edu",
            "qualification": "PhD",
            "experienceYears": 12
        }),
    );
    let teacher_id = created["teacherId"].as_str().expect("teacherId").to_string();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({
            "teacherNo": "TCH-01",
            "name": "Another",
            "department": "EEE",
            "email": "another@example.edu"
        }),
    );
    assert_eq!(error["code"], json!("duplicate_teacher"));

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({
            "teacherNo": "TCH-02",
            "name": "Mr. Kamal Uddin",
            "department": "EEE",
            "email": "kamal@example.edu"
        }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.deactivate",
        json!({ "teacherId": teacher_id }),
    );

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.list",
        json!({ "activeOnly": true }),
    );
    let rows = active["teachers"].as_array().expect("teachers");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["teacherNo"], json!("TCH-02"));

    let stats = request_ok(&mut stdin, &mut reader, "7", "teachers.stats", json!({}));
    assert_eq!(stats["totalTeachers"], json!(2));
    assert_eq!(stats["activeTeachers"], json!(1));
    assert_eq!(stats["inactiveTeachers"], json!(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "teachers.get",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(error["code"], json!("not_found"));

    let _ = child.kill();
}

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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
fn create_result_derives_all_fields() {
    let workspace = temp_dir("edumanage-create-derive");
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
        "results.create",
        json!({
            "studentId": "STU-1001",
            "studentName": "Ayesha Rahman",
            "department": "CSE",
            "semester": "3rd",
            "subjects": [
                { "subjectName": "Algorithms", "subjectCode": "CSE-301", "marks": 90, "credit": 3 },
                { "subjectName": "Statistics", "subjectCode": "MAT-305", "marks": 45, "credit": 2 }
            ]
        }),
    );

    let result = created.get("result").expect("result payload");
    assert_eq!(result["totalMarks"], json!(200));
    assert_eq!(result["obtainedMarks"], json!(135));
    assert_eq!(result["percentage"], json!(67.5));
    assert_eq!(result["cgpa"], json!(3.3));
    assert_eq!(result["grade"], json!("B"));
    assert_eq!(result["status"], json!("Pass"));
    assert_eq!(result["examType"], json!("Regular"));
    assert_eq!(result["published"], json!(false));

    let subjects = result["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[0]["grade"], json!("A+"));
    assert_eq!(subjects[1]["grade"], json!("D"));
    // Insertion order is preserved.
    assert_eq!(subjects[0]["subjectCode"], json!("CSE-301"));
    assert_eq!(subjects[1]["subjectCode"], json!("MAT-305"));

    let _ = child.kill();
}

#[test]
fn duplicate_student_semester_is_rejected() {
    let workspace = temp_dir("edumanage-create-duplicate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let params = json!({
        "studentId": "STU-2002",
        "studentName": "Tanvir Hasan",
        "department": "EEE",
        "semester": "5th",
        "subjects": [
            { "subjectName": "Circuits", "subjectCode": "EEE-501", "marks": 75, "credit": 4 }
        ]
    });
    request_ok(&mut stdin, &mut reader, "2", "results.create", params.clone());
    let error = request_err(&mut stdin, &mut reader, "3", "results.create", params);
    assert_eq!(error["code"], json!("duplicate_result"));

    // A different semester for the same student is fine.
    let mut other = json!({
        "studentId": "STU-2002",
        "studentName": "Tanvir Hasan",
        "department": "EEE",
        "semester": "6th",
        "subjects": [
            { "subjectName": "Signals", "subjectCode": "EEE-601", "marks": 64, "credit": 3 }
        ]
    });
    other["examType"] = json!("Improvement");
    let created = request_ok(&mut stdin, &mut reader, "4", "results.create", other);
    assert_eq!(created["result"]["examType"], json!("Improvement"));

    let _ = child.kill();
}

#[test]
fn empty_subject_list_yields_zero_totals_and_pass() {
    let workspace = temp_dir("edumanage-create-empty");
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
        "results.create",
        json!({
            "studentId": "STU-3003",
            "studentName": "Noor Jahan",
            "department": "BBA",
            "semester": "1st",
            "subjects": []
        }),
    );

    let result = &created["result"];
    assert_eq!(result["totalMarks"], json!(0));
    assert_eq!(result["obtainedMarks"], json!(0));
    assert_eq!(result["percentage"], json!(0.0));
    assert_eq!(result["cgpa"], json!(0.0));
    assert_eq!(result["status"], json!("Pass"));
    assert_eq!(result["subjects"], json!([]));

    let _ = child.kill();
}

#[test]
fn validation_failure_stores_nothing() {
    let workspace = temp_dir("edumanage-create-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "results.create",
        json!({
            "studentId": "STU-4004",
            "studentName": "Imran Kabir",
            "department": "CSE",
            "semester": "2nd",
            "subjects": [
                { "subjectName": "Physics", "subjectCode": "PHY-201", "marks": 101, "credit": 3 }
            ]
        }),
    );
    assert_eq!(error["code"], json!("bad_params"));
    assert_eq!(error["details"]["field"], json!("marks"));

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "results.create",
        json!({
            "studentId": "STU-4004",
            "studentName": "Imran Kabir",
            "department": "CSE",
            "semester": "2nd",
            "subjects": [
                { "subjectName": "Physics", "subjectCode": "PHY-201", "marks": 80, "credit": 6 }
            ]
        }),
    );
    assert_eq!(error["code"], json!("bad_params"));
    assert_eq!(error["details"]["field"], json!("credit"));

    // Neither attempt left a partial record behind.
    let listed = request_ok(&mut stdin, &mut reader, "4", "results.list", json!({}));
    assert_eq!(listed["results"], json!([]));

    let _ = child.kill();
}

#[test]
fn malformed_line_gets_bad_json_and_daemon_keeps_serving() {
    let workspace = temp_dir("edumanage-bad-json");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write malformed line");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // The daemon is still alive and answers the next request.
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = child.kill();
}

#[test]
fn status_follows_failed_subject_count_not_percentage() {
    let workspace = temp_dir("edumanage-create-status");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Two failed subjects out of four: supplementary.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.create",
        json!({
            "studentId": "STU-5005",
            "studentName": "Farzana Akter",
            "department": "CSE",
            "semester": "4th",
            "subjects": [
                { "subjectName": "S1", "subjectCode": "C1", "marks": 95, "credit": 3 },
                { "subjectName": "S2", "subjectCode": "C2", "marks": 90, "credit": 3 },
                { "subjectName": "S3", "subjectCode": "C3", "marks": 35, "credit": 2 },
                { "subjectName": "S4", "subjectCode": "C4", "marks": 30, "credit": 2 }
            ]
        }),
    );
    assert_eq!(created["result"]["status"], json!("Supplementary"));

    // Three failed subjects: fail, despite a high-scoring subject.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.create",
        json!({
            "studentId": "STU-5006",
            "studentName": "Rafiq Islam",
            "department": "CSE",
            "semester": "4th",
            "subjects": [
                { "subjectName": "S1", "subjectCode": "C1", "marks": 100, "credit": 5 },
                { "subjectName": "S2", "subjectCode": "C2", "marks": 39, "credit": 1 },
                { "subjectName": "S3", "subjectCode": "C3", "marks": 20, "credit": 1 },
                { "subjectName": "S4", "subjectCode": "C4", "marks": 10, "credit": 1 }
            ]
        }),
    );
    assert_eq!(created["result"]["status"], json!("Fail"));

    let _ = child.kill();
}

use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "edumanage.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            semester TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_semester ON students(semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            teacher_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            qualification TEXT,
            experience_years INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_department ON teachers(department)",
        [],
    )?;

    // Results are keyed by the institutional student number, not the
    // students row id: a result may be recorded before (or survive after)
    // the matching student profile.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            department TEXT NOT NULL,
            semester TEXT NOT NULL,
            exam_type TEXT NOT NULL DEFAULT 'Regular',
            exam_date TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            total_marks INTEGER NOT NULL,
            obtained_marks INTEGER NOT NULL,
            percentage REAL NOT NULL,
            cgpa REAL NOT NULL,
            grade TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, semester)
        )",
        [],
    )?;
    ensure_results_exam_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_department ON results(department)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_semester ON results(semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_subjects(
            id TEXT PRIMARY KEY,
            result_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            subject_name TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            marks INTEGER NOT NULL,
            credit INTEGER NOT NULL,
            grade TEXT NOT NULL,
            FOREIGN KEY(result_id) REFERENCES results(id),
            UNIQUE(result_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_subjects_result ON result_subjects(result_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_results_exam_columns(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate exam metadata on results.
    if !table_has_column(conn, "results", "exam_type")? {
        conn.execute(
            "ALTER TABLE results ADD COLUMN exam_type TEXT NOT NULL DEFAULT 'Regular'",
            [],
        )?;
    }
    if !table_has_column(conn, "results", "exam_date")? {
        conn.execute(
            "ALTER TABLE results ADD COLUMN exam_date TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

mod backup;
mod db;
mod grading;
mod ipc;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // The request id is unrecoverable from a malformed line.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };

        if writeln!(stdout, "{}", resp).is_err() {
            break;
        }
        let _ = stdout.flush();
    }
}

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let workspace = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => match state.workspace.clone() {
            Some(w) => w,
            None => return err(&req.id, "no_workspace", "select a workspace first", None),
        },
    };

    // Drop the open connection before swapping the database file.
    state.db = None;

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "backup_import_failed", format!("{e:#}"), None),
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.workspace = Some(workspace.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormatDetected": summary.bundle_format_detected,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}

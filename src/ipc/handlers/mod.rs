pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod enrollments;
pub mod photos;
pub mod setup;

use crate::auth::{evaluate, GateState};
use crate::ipc::types::AppState;

/// Current gate state for the live session against the configured admin
/// address. `Unknown` until a workspace is open.
pub fn gate_state(state: &AppState) -> GateState {
    let Some(conn) = state.db.as_ref() else {
        return GateState::Unknown;
    };
    let admin = setup::admin_email(conn);
    evaluate(
        state.session.as_ref().map(|s| s.email.as_str()),
        admin.as_deref(),
    )
}

/// Server-side enforcement for admin-only methods: anything other than Admin
/// is a routing decision, not an error the caller can retry.
pub fn require_admin(state: &AppState) -> Result<(), (&'static str, String)> {
    match gate_state(state) {
        GateState::Admin => Ok(()),
        GateState::Unknown => Err(("no_workspace", "select a workspace first".to_string())),
        other => Err((
            "not_authorized",
            format!("admin session required (gate state: {})", other.as_str()),
        )),
    }
}

/// Re-evaluates the gate after something that can change it (sign-in, admin
/// address reconfiguration). A NonAdmin landing forces sign-out.
pub fn enforce_gate(state: &mut AppState) -> GateState {
    let gate = gate_state(state);
    if gate == GateState::NonAdmin {
        if let Some(session) = state.session.take() {
            eprintln!("enrolld: signed out non-admin session {}", session.email);
        }
        return GateState::Unauthenticated;
    }
    gate
}

pub fn account_exists(conn: &rusqlite::Connection, email: &str) -> anyhow::Result<bool> {
    use rusqlite::OptionalExtension;
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE email = ?",
            [&email.to_ascii_lowercase()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

pub fn any_admin_account(state: &AppState) -> bool {
    let Some(conn) = state.db.as_ref() else {
        return false;
    };
    let Some(admin) = setup::admin_email(conn) else {
        return false;
    };
    account_exists(conn, &admin).unwrap_or(false)
}

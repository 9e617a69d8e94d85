use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{any_admin_account, enforce_gate, require_admin};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

/// Default of the externalized single-entry allow list. The original
/// hard-coded this address in the client.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@questo.com";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "/photos";

#[derive(Clone, Copy)]
enum SetupSection {
    Access,
    Photos,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(Self::Access),
            "photos" => Some(Self::Photos),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Access => "setup.access",
            Self::Photos => "setup.photos",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Access => json!({
            "adminEmail": DEFAULT_ADMIN_EMAIL
        }),
        SetupSection::Photos => json!({
            "publicBaseUrl": DEFAULT_PUBLIC_BASE_URL
        }),
    }
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    match db::settings_get_json(conn, section.key())? {
        Some(v) => Ok(v),
        None => Ok(default_section(section)),
    }
}

/// Configured admin address, lowercased. Falls back to the default when the
/// settings row is missing or malformed.
pub fn admin_email(conn: &Connection) -> Option<String> {
    let section = load_section(conn, SetupSection::Access).ok()?;
    let email = section
        .get("adminEmail")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_ADMIN_EMAIL);
    Some(email.to_ascii_lowercase())
}

pub fn public_base_url(conn: &Connection) -> String {
    load_section(conn, SetupSection::Photos)
        .ok()
        .and_then(|s| {
            s.get("publicBaseUrl")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string())
}

fn parse_email(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be a string", key))?
        .trim()
        .to_ascii_lowercase();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if !s.contains('@') || s.starts_with('@') || s.ends_with('@') {
        return Err(format!("{} must be an email address", key));
    }
    Ok(s)
}

fn parse_base_url(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be a string", key))?
        .trim()
        .trim_end_matches('/')
        .to_string();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Access => match k.as_str() {
                "adminEmail" => {
                    obj.insert(k.clone(), Value::String(parse_email(v, k)?));
                }
                _ => return Err(format!("unknown access field: {}", k)),
            },
            SetupSection::Photos => match k.as_str() {
                "publicBaseUrl" => {
                    obj.insert(k.clone(), Value::String(parse_base_url(v, k)?));
                }
                _ => return Err(format!("unknown photos field: {}", k)),
            },
        }
    }
    Ok(())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let access = match load_section(conn, SetupSection::Access) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let photos = match load_section(conn, SetupSection::Photos) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "access": access,
            "photos": photos
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    // Open until the admin account is bootstrapped, admin-only afterwards.
    if any_admin_account(state) {
        if let Err((code, message)) = require_admin(state) {
            return err(&req.id, code, message, None);
        }
    }

    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()).cloned() else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        let mut current = match load_section(conn, section) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if let Err(msg) = merge_section_patch(section, &mut current, &patch_obj) {
            return err(&req.id, "bad_params", msg, None);
        }
        if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    // Changing the admin address can demote the live session.
    let gate = enforce_gate(state);
    ok(
        &req.id,
        json!({ "ok": true, "state": gate.as_str(), "route": gate.route() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

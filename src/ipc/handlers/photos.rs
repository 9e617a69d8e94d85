use crate::ipc::error::{err, ok};
use crate::ipc::handlers::require_admin;
use crate::ipc::types::{AppState, Request};
use crate::photos::{extract_key, sanitize_filename};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;

/// The dashboard's photo download action: resolve the stored blob behind a
/// retrieval URL and copy it to a destination chosen by the UI.
fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err((code, message)) = require_admin(state) {
        return err(&req.id, code, message, None);
    }
    let Some(store) = state.photos.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(url) = req.params.get("url").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing url", None);
    };
    let Some(dest_dir) = req.params.get("destDir").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing destDir", None);
    };
    let filename = req
        .params
        .get("filename")
        .and_then(|v| v.as_str())
        .map(sanitize_filename)
        .unwrap_or_else(|| "photo.jpg".to_string());

    let Some(src) = store.resolve_url(url) else {
        return err(&req.id, "not_found", "no stored photo for that url", None);
    };

    let dest_dir = PathBuf::from(dest_dir);
    if let Err(e) = std::fs::create_dir_all(&dest_dir) {
        return err(&req.id, "export_failed", e.to_string(), None);
    }
    let dest = dest_dir.join(filename);
    match std::fs::copy(&src, &dest) {
        Ok(_) => ok(
            &req.id,
            json!({ "path": dest.to_string_lossy() }),
        ),
        Err(e) => err(&req.id, "export_failed", e.to_string(), None),
    }
}

/// Reconciliation read for the accepted upload-then-write inconsistency:
/// stored keys no persisted document references. Reports only; the system
/// has no delete path.
fn handle_orphans(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err((code, message)) = require_admin(state) {
        return err(&req.id, code, message, None);
    }
    let (Some(conn), Some(store)) = (state.db.as_ref(), state.photos.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let stored = match store.list_keys() {
        Ok(keys) => keys,
        Err(e) => return err(&req.id, "photo_store_failed", e.to_string(), None),
    };

    let mut referenced: HashSet<String> = HashSet::new();
    let mut stmt = match conn.prepare("SELECT doc FROM enrollments") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let docs = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let docs = match docs {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for raw in docs {
        let Ok(doc) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if let Some(key) = doc["studentPhotoURL"].as_str().and_then(extract_key) {
            referenced.insert(key);
        }
        if let Some(contacts) = doc["contacts"].as_array() {
            for contact in contacts {
                if let Some(key) = contact["photoURL"].as_str().and_then(extract_key) {
                    referenced.insert(key);
                }
            }
        }
    }

    let mut orphans: Vec<String> = stored
        .into_iter()
        .filter(|k| !referenced.contains(k))
        .collect();
    orphans.sort();

    ok(
        &req.id,
        json!({
            "orphans": orphans,
            "referenced": referenced.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "photos.export" => Some(handle_export(state, req)),
        "photos.orphans" => Some(handle_orphans(state, req)),
        _ => None,
    }
}

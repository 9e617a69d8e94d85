use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::photos::PhotoStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// In-process session identity. One daemon serves one UI, so a single
/// current identity mirrors the original's "current session user".
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub photos: Option<PhotoStore>,
    pub session: Option<Session>,
}

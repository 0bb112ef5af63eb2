use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line on stdin: `{"id": "...", "method": "...", "params": {...}}`.
/// `params` stays raw here; each handler deserializes its own typed struct.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

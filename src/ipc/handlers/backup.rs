use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{non_blank, parse_params, require_admin, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    actor_user_id: String,
    out_path: String,
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.clone()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let p: ExportParams = match parse_params(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = non_blank(&p.out_path, "outPath") {
        return e.response(&req.id);
    }
    if let Err(e) = require_admin(conn, &p.actor_user_id) {
        return e.response(&req.id);
    }

    match backup::export_workspace_bundle(&workspace, &PathBuf::from(&p.out_path)) {
        Ok(summary) => {
            tracing::info!(out = %p.out_path, "workspace exported");
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                    "entryCount": summary.entry_count
                }),
            )
        }
        Err(e) => err(&req.id, "export_failed", e.to_string(), None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportParams {
    actor_user_id: String,
    in_path: String,
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.clone()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let p: ImportParams = match parse_params(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = non_blank(&p.in_path, "inPath") {
        return e.response(&req.id);
    }
    if let Err(e) = require_admin(conn, &p.actor_user_id) {
        return e.response(&req.id);
    }

    // Close the live connection before the database file is replaced, then
    // reopen against the installed copy.
    state.db = None;
    let summary = match backup::import_workspace_bundle(&PathBuf::from(&p.in_path), &workspace) {
        Ok(v) => v,
        Err(e) => {
            state.db = db::open_db(&workspace).ok();
            return err(&req.id, "import_failed", e.to_string(), None);
        }
    };
    match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            tracing::info!(input = %p.in_path, "workspace imported");
            ok(
                &req.id,
                json!({
                    "bundleFormatDetected": summary.bundle_format_detected,
                    "digestVerified": summary.digest_verified
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.export" => Some(handle_export(state, req)),
        "workspace.import" => Some(handle_import(state, req)),
        _ => None,
    }
}

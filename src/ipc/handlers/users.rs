use crate::db;
use crate::ipc::helpers::{
    non_blank, parse_params, require_admin, require_self_or_admin, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 4] = ["adviser", "panel", "admin", "student"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserParams {
    #[serde(default)]
    actor_user_id: Option<String>,
    last_name: String,
    first_name: String,
    role: String,
    college: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    status: Option<String>,
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: CreateUserParams = parse_params(params)?;

    let last_name = p.last_name.trim().to_string();
    let first_name = p.first_name.trim().to_string();
    if last_name.is_empty() || first_name.is_empty() {
        return Err(HandlerErr::bad_params(
            "firstName/lastName must not be empty",
        ));
    }
    if !ROLES.contains(&p.role.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", p.role)));
    }
    non_blank(&p.college, "college")?;
    let status = p.status.unwrap_or_else(|| "pending".to_string());
    if status != "pending" && status != "approved" {
        return Err(HandlerErr::bad_params(format!(
            "unknown status: {}",
            status
        )));
    }

    // The very first user bootstraps an empty directory; after that every
    // directory mutation names an admin actor.
    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(HandlerErr::query)?;
    if user_count > 0 {
        let actor_id = p.actor_user_id.as_deref().unwrap_or("");
        require_admin(conn, actor_id)?;
    }

    let user_id = Uuid::new_v4().to_string();
    let active_i = if p.active.unwrap_or(true) { 1 } else { 0 };
    conn.execute(
        "INSERT INTO users(id, last_name, first_name, role, college, active, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &last_name,
            &first_name,
            &p.role,
            p.college.trim(),
            active_i,
            &status,
            db::now_utc(),
        ),
    )
    .map_err(|e| HandlerErr::insert("users", e))?;

    Ok(json!({ "userId": user_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveUserParams {
    actor_user_id: String,
    user_id: String,
}

fn users_approve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: ApproveUserParams = parse_params(params)?;
    non_blank(&p.user_id, "userId")?;
    require_admin(conn, &p.actor_user_id)?;

    let changed = conn
        .execute(
            "UPDATE users SET status = 'approved' WHERE id = ?",
            [&p.user_id],
        )
        .map_err(|e| HandlerErr::update("users", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }

    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListNotificationsParams {
    actor_user_id: String,
    user_id: String,
}

fn notifications_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListNotificationsParams = parse_params(params)?;
    non_blank(&p.user_id, "userId")?;
    require_self_or_admin(conn, &p.actor_user_id, &p.user_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, kind, title, message, context_type, context_id, created_at
             FROM notifications
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let notifications = stmt
        .query_map([&p.user_id], |r| {
            let id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let title: String = r.get(2)?;
            let message: String = r.get(3)?;
            let context_type: String = r.get(4)?;
            let context_id: String = r.get(5)?;
            let created_at: String = r.get(6)?;
            Ok(json!({
                "id": id,
                "kind": kind,
                "title": title,
                "message": message,
                "contextType": context_type,
                "contextId": context_id,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "notifications": notifications }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(with_conn(state, req, users_create)),
        "users.approve" => Some(with_conn(state, req, users_approve)),
        "notifications.list" => Some(with_conn(state, req, notifications_list)),
        _ => None,
    }
}

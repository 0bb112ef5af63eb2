use crate::db;
use crate::ipc::helpers::{non_blank, parse_params, require_admin, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupParams {
    actor_user_id: String,
    name: String,
    college: String,
    adviser_id: String,
}

fn groups_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: CreateGroupParams = parse_params(params)?;
    let name = p.name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    non_blank(&p.college, "college")?;
    non_blank(&p.adviser_id, "adviserId")?;
    require_admin(conn, &p.actor_user_id)?;

    let adviser_role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&p.adviser_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    match adviser_role.as_deref() {
        None => return Err(HandlerErr::not_found("adviser not found")),
        Some("adviser") => {}
        Some(other) => {
            return Err(HandlerErr::bad_params(format!(
                "adviserId must reference an adviser, got role {}",
                other
            )))
        }
    }

    let group_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO groups(id, name, college, adviser_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &group_id,
            &name,
            p.college.trim(),
            &p.adviser_id,
            db::now_utc(),
        ),
    )
    .map_err(|e| HandlerErr::insert("groups", e))?;

    Ok(json!({ "groupId": group_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(with_conn(state, req, groups_create)),
        _ => None,
    }
}

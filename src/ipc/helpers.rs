use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Handler-level failure carried up to the error envelope. Constructors cover
/// the taxonomy every handler shares; anything exotic builds the struct
/// directly.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "forbidden",
            message: message.into(),
            details: None,
        }
    }

    pub fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn insert(table: &str, e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn update(table: &str, e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_commit_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

/// Deserialize the raw params object into the operation's input struct.
/// Missing or ill-typed fields land in `bad_params` before any storage
/// access.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Identifiers arrive as uuid strings; blank means the caller never had one.
pub fn non_blank(value: &str, field: &str) -> Result<(), HandlerErr> {
    if value.trim().is_empty() {
        return Err(HandlerErr::bad_params(format!("missing {}", field)));
    }
    Ok(())
}

pub fn non_empty_ids(values: &[String], field: &str) -> Result<(), HandlerErr> {
    if values.is_empty() {
        return Err(HandlerErr::bad_params(format!(
            "{} must not be empty",
            field
        )));
    }
    for v in values {
        if v.trim().is_empty() {
            return Err(HandlerErr::bad_params(format!(
                "{} must not contain blank ids",
                field
            )));
        }
    }
    Ok(())
}

pub struct Actor {
    pub id: String,
    pub role: String,
}

fn load_actor(conn: &Connection, actor_user_id: &str) -> Result<Actor, HandlerErr> {
    non_blank(actor_user_id, "actorUserId")?;
    let row: Option<(String, i64, String)> = conn
        .query_row(
            "SELECT role, active, status FROM users WHERE id = ?",
            [actor_user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((role, active, status)) = row else {
        return Err(HandlerErr::forbidden("unknown actor"));
    };
    if active == 0 {
        return Err(HandlerErr::forbidden("actor is deactivated"));
    }
    if status != "approved" {
        return Err(HandlerErr::forbidden("actor is not approved"));
    }
    Ok(Actor {
        id: actor_user_id.to_string(),
        role,
    })
}

/// Every administrative operation names its caller explicitly; there is no
/// ambient session.
pub fn require_admin(conn: &Connection, actor_user_id: &str) -> Result<Actor, HandlerErr> {
    let actor = load_actor(conn, actor_user_id)?;
    if actor.role != "admin" {
        return Err(HandlerErr::forbidden("admin role required"));
    }
    Ok(actor)
}

pub fn require_student(conn: &Connection, actor_user_id: &str) -> Result<Actor, HandlerErr> {
    let actor = load_actor(conn, actor_user_id)?;
    if actor.role != "student" {
        return Err(HandlerErr::forbidden("student role required"));
    }
    Ok(actor)
}

pub fn require_self_or_admin(
    conn: &Connection,
    actor_user_id: &str,
    user_id: &str,
) -> Result<Actor, HandlerErr> {
    let actor = load_actor(conn, actor_user_id)?;
    if actor.role != "admin" && actor.id != user_id {
        return Err(HandlerErr::forbidden("admin role required"));
    }
    Ok(actor)
}

/// Shared wrapper for handlers that need an open workspace: produces the
/// `no_workspace` envelope when none is selected and maps the handler core's
/// Result into the ok/err envelopes.
pub fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

use crate::assign::{self, Context};
use crate::db;
use crate::ipc::helpers::{
    non_blank, non_empty_ids, parse_params, require_admin, require_student, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

struct GroupRow {
    name: String,
    college: String,
    adviser_id: String,
}

fn load_group(conn: &Connection, group_id: &str) -> Result<Option<GroupRow>, HandlerErr> {
    conn.query_row(
        "SELECT name, college, adviser_id FROM groups WHERE id = ?",
        [group_id],
        |r| {
            Ok(GroupRow {
                name: r.get(0)?,
                college: r.get(1)?,
                adviser_id: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

/// The discussion only becomes reachable once the group's chapter-3
/// manuscript is approved.
fn chapter3_approved(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM submissions
         WHERE group_id = ? AND kind = 'chapter' AND chapter_number = 3
           AND status = 'approved'
         LIMIT 1",
        [group_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn load_discussion(
    conn: &Connection,
    group_id: &str,
) -> Result<Option<(String, String)>, HandlerErr> {
    conn.query_row(
        "SELECT id, created_at FROM discussions WHERE group_id = ?",
        [group_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn discussion_json(group_id: &str, group: &GroupRow, id: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "groupId": group_id,
        "groupName": group.name,
        "adviserId": group.adviser_id,
        "createdAt": created_at
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionInfoParams {
    actor_user_id: String,
    group_id: String,
}

fn discussions_info(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: DiscussionInfoParams = parse_params(params)?;
    non_blank(&p.group_id, "groupId")?;
    require_admin(conn, &p.actor_user_id)?;

    let Some(group) = load_group(conn, &p.group_id)? else {
        return Err(HandlerErr::not_found("group not found"));
    };

    if !chapter3_approved(conn, &p.group_id)? {
        return Ok(json!({ "state": "chapter_pending" }));
    }

    let Some((discussion_id, created_at)) = load_discussion(conn, &p.group_id)? else {
        // Creation happens on first student access, not here.
        return Ok(json!({ "state": "not_created" }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.user_id, a.role, u.last_name, u.first_name
             FROM assignments a
             JOIN users u ON u.id = a.user_id
             WHERE a.context_type = 'discussion' AND a.context_id = ? AND a.is_active = 1
             ORDER BY a.role DESC, u.last_name, u.first_name",
        )
        .map_err(HandlerErr::query)?;
    let mut participant_user_ids: HashSet<String> = HashSet::new();
    let participants = stmt
        .query_map([&discussion_id], |r| {
            let assignment_id: String = r.get(0)?;
            let user_id: String = r.get(1)?;
            let role: String = r.get(2)?;
            let last_name: String = r.get(3)?;
            let first_name: String = r.get(4)?;
            Ok((assignment_id, user_id, role, last_name, first_name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|(assignment_id, user_id, role, last_name, first_name)| {
            participant_user_ids.insert(user_id.clone());
            json!({
                "assignmentId": assignment_id,
                "userId": user_id,
                "role": role,
                "lastName": last_name,
                "firstName": first_name,
                "displayName": format!("{}, {}", last_name, first_name)
            })
        })
        .collect::<Vec<_>>();

    // Complement set: eligible faculty from the group's college who are not
    // already active participants. Computed here rather than with a SQL
    // NOT IN list.
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, role
             FROM users
             WHERE college = ? AND active = 1 AND status = 'approved'
               AND role IN ('adviser', 'panel')
             ORDER BY role DESC, last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let available = stmt
        .query_map([&group.college], |r| {
            let user_id: String = r.get(0)?;
            let last_name: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let role: String = r.get(3)?;
            Ok((user_id, last_name, first_name, role))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?
        .into_iter()
        .filter(|(user_id, _, _, _)| !participant_user_ids.contains(user_id))
        .map(|(user_id, last_name, first_name, role)| {
            json!({
                "userId": user_id,
                "lastName": last_name,
                "firstName": first_name,
                "displayName": format!("{}, {}", last_name, first_name),
                "role": role
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "state": "active",
        "discussion": discussion_json(&p.group_id, &group, &discussion_id, &created_at),
        "participants": participants,
        "available": available
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenDiscussionParams {
    actor_user_id: String,
    group_id: String,
}

fn discussions_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: OpenDiscussionParams = parse_params(params)?;
    non_blank(&p.group_id, "groupId")?;
    require_student(conn, &p.actor_user_id)?;

    let Some(group) = load_group(conn, &p.group_id)? else {
        return Err(HandlerErr::not_found("group not found"));
    };

    if !chapter3_approved(conn, &p.group_id)? {
        return Ok(json!({ "state": "chapter_pending" }));
    }

    if let Some((discussion_id, created_at)) = load_discussion(conn, &p.group_id)? {
        return Ok(json!({
            "state": "active",
            "created": false,
            "discussion": discussion_json(&p.group_id, &group, &discussion_id, &created_at)
        }));
    }

    let discussion_id = Uuid::new_v4().to_string();
    let created_at = db::now_utc();
    conn.execute(
        "INSERT INTO discussions(id, group_id, created_at) VALUES(?, ?, ?)",
        (&discussion_id, &p.group_id, &created_at),
    )
    .map_err(|e| HandlerErr::insert("discussions", e))?;
    tracing::info!(group = %p.group_id, discussion = %discussion_id, "discussion created");

    Ok(json!({
        "state": "active",
        "created": true,
        "discussion": discussion_json(&p.group_id, &group, &discussion_id, &created_at)
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantsParams {
    actor_user_id: String,
    discussion_id: String,
    participants: Vec<String>,
}

fn discussions_add_participants(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: AddParticipantsParams = parse_params(params)?;
    non_blank(&p.discussion_id, "discussionId")?;
    non_empty_ids(&p.participants, "participants")?;
    require_admin(conn, &p.actor_user_id)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM discussions WHERE id = ?",
            [&p.discussion_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("discussion not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let added = assign::reconcile(&tx, Context::Discussion, &p.discussion_id, &p.participants)
        .map_err(|e| HandlerErr::update("assignments", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(discussion = %p.discussion_id, added, "participants added");
    Ok(json!({
        "added": added,
        "message": format!("{} participant(s) added", added)
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveParticipantParams {
    actor_user_id: String,
    discussion_id: String,
    assignment_id: String,
}

fn discussions_remove_participant(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: RemoveParticipantParams = parse_params(params)?;
    non_blank(&p.discussion_id, "discussionId")?;
    non_blank(&p.assignment_id, "assignmentId")?;
    require_admin(conn, &p.actor_user_id)?;

    assign::deactivate(conn, Context::Discussion, &p.discussion_id, &p.assignment_id)
        .map_err(|e| HandlerErr::update("assignments", e))?;

    Ok(json!({ "message": "participant removed" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "discussions.info" => Some(with_conn(state, req, discussions_info)),
        "discussions.open" => Some(with_conn(state, req, discussions_open)),
        "discussions.addParticipants" => Some(with_conn(state, req, discussions_add_participants)),
        "discussions.removeParticipant" => {
            Some(with_conn(state, req, discussions_remove_participant))
        }
        _ => None,
    }
}

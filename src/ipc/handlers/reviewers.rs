use crate::assign::{self, Context};
use crate::ipc::helpers::{
    non_blank, non_empty_ids, parse_params, require_admin, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

fn submission_exists(conn: &Connection, submission_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM submissions WHERE id = ?",
        [submission_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignReviewersParams {
    actor_user_id: String,
    submission_id: String,
    reviewers: Vec<String>,
}

fn reviewers_assign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: AssignReviewersParams = parse_params(params)?;
    non_blank(&p.submission_id, "submissionId")?;
    non_empty_ids(&p.reviewers, "reviewers")?;
    require_admin(conn, &p.actor_user_id)?;

    if !submission_exists(conn, &p.submission_id)? {
        return Err(HandlerErr::not_found("submission not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let added = assign::reconcile(&tx, Context::Submission, &p.submission_id, &p.reviewers)
        .map_err(|e| HandlerErr::update("assignments", e))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(submission = %p.submission_id, added, "reviewers assigned");
    Ok(json!({
        "added": added,
        "message": format!("{} reviewer(s) assigned", added)
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnassignReviewerParams {
    actor_user_id: String,
    submission_id: String,
    assignment_id: String,
}

fn reviewers_unassign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: UnassignReviewerParams = parse_params(params)?;
    non_blank(&p.submission_id, "submissionId")?;
    non_blank(&p.assignment_id, "assignmentId")?;
    require_admin(conn, &p.actor_user_id)?;

    assign::deactivate(conn, Context::Submission, &p.submission_id, &p.assignment_id)
        .map_err(|e| HandlerErr::update("assignments", e))?;

    Ok(json!({ "message": "reviewer removed" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAssignedParams {
    actor_user_id: String,
    submission_id: String,
}

fn reviewers_list_assigned(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListAssignedParams = parse_params(params)?;
    non_blank(&p.submission_id, "submissionId")?;
    require_admin(conn, &p.actor_user_id)?;

    if !submission_exists(conn, &p.submission_id)? {
        return Err(HandlerErr::not_found("submission not found"));
    }

    // Panel members sort ahead of advisers ('panel' > 'adviser'), then by
    // surname and given name.
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.user_id, a.role, a.assigned_at, u.last_name, u.first_name
             FROM assignments a
             JOIN users u ON u.id = a.user_id
             WHERE a.context_type = 'submission' AND a.context_id = ? AND a.is_active = 1
             ORDER BY a.role DESC, u.last_name, u.first_name",
        )
        .map_err(HandlerErr::query)?;
    let reviewers = stmt
        .query_map([&p.submission_id], |r| {
            let assignment_id: String = r.get(0)?;
            let user_id: String = r.get(1)?;
            let role: String = r.get(2)?;
            let assigned_at: String = r.get(3)?;
            let last_name: String = r.get(4)?;
            let first_name: String = r.get(5)?;
            Ok(json!({
                "assignmentId": assignment_id,
                "userId": user_id,
                "role": role,
                "assignedAt": assigned_at,
                "lastName": last_name,
                "firstName": first_name,
                "displayName": format!("{}, {}", last_name, first_name)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "reviewers": reviewers }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAvailableParams {
    actor_user_id: String,
    college: String,
}

fn reviewers_list_available(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListAvailableParams = parse_params(params)?;
    non_blank(&p.college, "college")?;
    require_admin(conn, &p.actor_user_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, role
             FROM users
             WHERE college = ? AND active = 1 AND status = 'approved'
               AND role IN ('adviser', 'panel')
             ORDER BY role DESC, last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let reviewers = stmt
        .query_map([p.college.trim()], |r| {
            let user_id: String = r.get(0)?;
            let last_name: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let role: String = r.get(3)?;
            Ok(json!({
                "userId": user_id,
                "lastName": last_name,
                "firstName": first_name,
                "displayName": format!("{}, {}", last_name, first_name),
                "role": role
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "reviewers": reviewers }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reviewers.assign" => Some(with_conn(state, req, reviewers_assign)),
        "reviewers.unassign" => Some(with_conn(state, req, reviewers_unassign)),
        "reviewers.listAssigned" => Some(with_conn(state, req, reviewers_list_assigned)),
        "reviewers.listAvailable" => Some(with_conn(state, req, reviewers_list_available)),
        _ => None,
    }
}

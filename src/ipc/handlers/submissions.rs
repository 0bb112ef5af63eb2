use crate::db;
use crate::ipc::helpers::{non_blank, parse_params, require_admin, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const STATUSES: [&str; 3] = ["pending", "approved", "rejected"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubmissionParams {
    actor_user_id: String,
    group_id: String,
    kind: String,
    #[serde(default)]
    chapter_number: Option<i64>,
    title: String,
}

fn submissions_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: CreateSubmissionParams = parse_params(params)?;
    non_blank(&p.group_id, "groupId")?;
    let title = p.title.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    let chapter_number = match p.kind.as_str() {
        "title" => {
            if p.chapter_number.is_some() {
                return Err(HandlerErr::bad_params(
                    "title submissions do not take chapterNumber",
                ));
            }
            None
        }
        "chapter" => {
            let n = p
                .chapter_number
                .ok_or_else(|| HandlerErr::bad_params("missing chapterNumber"))?;
            if !(1..=5).contains(&n) {
                return Err(HandlerErr::bad_params(
                    "chapterNumber must be between 1 and 5",
                ));
            }
            Some(n)
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "unknown submission kind: {}",
                other
            )))
        }
    };
    require_admin(conn, &p.actor_user_id)?;

    let group_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&p.group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    if group_exists.is_none() {
        return Err(HandlerErr::not_found("group not found"));
    }

    let submission_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO submissions(id, group_id, kind, chapter_number, title, status, submitted_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?)",
        (
            &submission_id,
            &p.group_id,
            &p.kind,
            chapter_number,
            &title,
            db::now_utc(),
        ),
    )
    .map_err(|e| HandlerErr::insert("submissions", e))?;

    Ok(json!({ "submissionId": submission_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSubmissionStatusParams {
    actor_user_id: String,
    submission_id: String,
    status: String,
}

fn submissions_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: SetSubmissionStatusParams = parse_params(params)?;
    non_blank(&p.submission_id, "submissionId")?;
    if !STATUSES.contains(&p.status.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "unknown status: {}",
            p.status
        )));
    }
    require_admin(conn, &p.actor_user_id)?;

    let changed = conn
        .execute(
            "UPDATE submissions SET status = ? WHERE id = ?",
            (&p.status, &p.submission_id),
        )
        .map_err(|e| HandlerErr::update("submissions", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("submission not found"));
    }

    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListForGroupParams {
    actor_user_id: String,
    group_id: String,
}

fn submissions_list_for_group(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListForGroupParams = parse_params(params)?;
    non_blank(&p.group_id, "groupId")?;
    require_admin(conn, &p.actor_user_id)?;

    let group_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&p.group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    if group_exists.is_none() {
        return Err(HandlerErr::not_found("group not found"));
    }

    // Correlated subquery so a submission with no reviewers still lists with
    // a zero count.
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.title,
               s.status,
               s.submitted_at,
               (SELECT COUNT(*) FROM assignments a
                WHERE a.context_type = 'submission'
                  AND a.context_id = s.id
                  AND a.is_active = 1) AS reviewer_count
             FROM submissions s
             WHERE s.group_id = ? AND s.kind = 'title'
             ORDER BY s.submitted_at DESC, s.rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let submissions = stmt
        .query_map([&p.group_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let status: String = r.get(2)?;
            let submitted_at: String = r.get(3)?;
            let reviewer_count: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "title": title,
                "status": status,
                "submittedAt": submitted_at,
                "reviewerCount": reviewer_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "submissions": submissions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.create" => Some(with_conn(state, req, submissions_create)),
        "submissions.setStatus" => Some(with_conn(state, req, submissions_set_status)),
        "submissions.listForGroup" => Some(with_conn(state, req, submissions_list_for_group)),
        _ => None,
    }
}

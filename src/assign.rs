use rusqlite::{Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::db;

/// The entity an assignment attaches to. The context decides both the
/// assignment type stored on the row and the notification wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Discussion,
    Submission,
}

impl Context {
    pub fn context_type(self) -> &'static str {
        match self {
            Context::Discussion => "discussion",
            Context::Submission => "submission",
        }
    }

    pub fn assignment_type(self) -> &'static str {
        match self {
            Context::Discussion => "participant",
            Context::Submission => "reviewer",
        }
    }

    fn notification_kind(self) -> &'static str {
        match self {
            Context::Discussion => "discussion_participant",
            Context::Submission => "review_assignment",
        }
    }

    fn notification_title(self) -> &'static str {
        match self {
            Context::Discussion => "Added to discussion",
            Context::Submission => "Review assignment",
        }
    }
}

/// Add-or-reactivate reconciliation for a batch of candidate user ids against
/// one context. Candidates that don't resolve in the users table are skipped
/// silently. Returns how many assignments were created or reactivated;
/// re-adding an already-active user is a no-op and is not counted, but every
/// resolved candidate still gets a notification row.
///
/// Runs entirely on the caller's transaction so a failure on any row (including
/// a notification insert) rolls back the whole batch.
pub fn reconcile(
    tx: &Transaction<'_>,
    context: Context,
    context_id: &str,
    candidate_user_ids: &[String],
) -> rusqlite::Result<usize> {
    let label = context_label(tx, context, context_id)?.unwrap_or_else(|| context_id.to_string());
    let now = db::now_utc();
    let mut added = 0usize;

    for user_id in candidate_user_ids {
        let role: Option<String> = tx
            .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(role) = role else {
            continue;
        };

        // Read-then-write: two daemons sharing one workspace could both miss
        // the row here and insert twice. A single process never interleaves
        // requests, so the duplicate is unreachable in the supported setup.
        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT id, is_active FROM assignments
                 WHERE context_type = ? AND context_id = ? AND user_id = ?
                 ORDER BY is_active DESC, assigned_at DESC
                 LIMIT 1",
                (context.context_type(), context_id, user_id),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((_, active)) if active != 0 => {}
            Some((assignment_id, _)) => {
                tx.execute(
                    "UPDATE assignments SET is_active = 1, assigned_at = ? WHERE id = ?",
                    (&now, &assignment_id),
                )?;
                added += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO assignments(
                       id, assignment_type, context_type, context_id,
                       user_id, role, is_active, assigned_at
                     ) VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        context.assignment_type(),
                        context.context_type(),
                        context_id,
                        user_id,
                        &role,
                        &now,
                    ),
                )?;
                added += 1;
            }
        }

        // Notified even when the assignment was already active; a re-add
        // doubles as a reminder to the participant.
        let message = match context {
            Context::Discussion => {
                format!("You have been added to the discussion for \"{}\".", label)
            }
            Context::Submission => format!("You have been assigned to review \"{}\".", label),
        };
        tx.execute(
            "INSERT INTO notifications(
               id, user_id, kind, title, message, context_type, context_id, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                user_id,
                context.notification_kind(),
                context.notification_title(),
                &message,
                context.context_type(),
                context_id,
                &now,
            ),
        )?;
    }

    Ok(added)
}

/// Mirror of `reconcile` for a single assignment: soft-delete by flipping
/// is_active off. Unconditional and idempotent; a nonexistent or already
/// inactive id changes zero rows and that is fine.
pub fn deactivate(
    conn: &Connection,
    context: Context,
    context_id: &str,
    assignment_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE assignments SET is_active = 0
         WHERE id = ? AND context_type = ? AND context_id = ?",
        (assignment_id, context.context_type(), context_id),
    )?;
    Ok(())
}

fn context_label(
    tx: &Transaction<'_>,
    context: Context,
    context_id: &str,
) -> rusqlite::Result<Option<String>> {
    match context {
        Context::Discussion => tx
            .query_row(
                "SELECT g.name FROM discussions d
                 JOIN groups g ON g.id = d.group_id
                 WHERE d.id = ?",
                [context_id],
                |r| r.get(0),
            )
            .optional(),
        Context::Submission => tx
            .query_row(
                "SELECT title FROM submissions WHERE id = ?",
                [context_id],
                |r| r.get(0),
            )
            .optional(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn insert_user(conn: &Connection, id: &str, role: &str) {
        conn.execute(
            "INSERT INTO users(id, last_name, first_name, role, college, active, status, created_at)
             VALUES(?, 'Reyes', 'Ana', ?, 'CCS', 1, 'approved', ?)",
            (id, role, db::now_utc()),
        )
        .expect("insert user");
    }

    fn seed_discussion(conn: &Connection, discussion_id: &str) {
        insert_user(conn, "adviser-1", "adviser");
        conn.execute(
            "INSERT INTO groups(id, name, college, adviser_id, created_at)
             VALUES('group-1', 'Crop Monitoring', 'CCS', 'adviser-1', ?)",
            [db::now_utc()],
        )
        .expect("insert group");
        conn.execute(
            "INSERT INTO discussions(id, group_id, created_at) VALUES(?, 'group-1', ?)",
            (discussion_id, db::now_utc()),
        )
        .expect("insert discussion");
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).expect("count query")
    }

    #[test]
    fn unknown_candidate_is_silently_skipped() {
        let mut conn = test_conn();
        seed_discussion(&conn, "disc-1");
        insert_user(&conn, "panel-1", "panel");

        let tx = conn.transaction().expect("tx");
        let added = reconcile(
            &tx,
            Context::Discussion,
            "disc-1",
            &["panel-1".into(), "ghost".into()],
        )
        .expect("reconcile");
        tx.commit().expect("commit");

        assert_eq!(added, 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM assignments"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notifications"), 1);
        let role: String = conn
            .query_row(
                "SELECT role FROM assignments WHERE user_id = 'panel-1'",
                [],
                |r| r.get(0),
            )
            .expect("role");
        assert_eq!(role, "panel");
    }

    #[test]
    fn readd_of_active_user_is_not_counted_but_still_notifies() {
        let mut conn = test_conn();
        seed_discussion(&conn, "disc-1");
        insert_user(&conn, "panel-1", "panel");

        for expected in [1usize, 0usize] {
            let tx = conn.transaction().expect("tx");
            let added =
                reconcile(&tx, Context::Discussion, "disc-1", &["panel-1".into()]).expect("reconcile");
            tx.commit().expect("commit");
            assert_eq!(added, expected);
        }

        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM assignments WHERE is_active = 1"),
            1
        );
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notifications"), 2);
    }

    #[test]
    fn deactivated_assignment_is_reactivated_not_duplicated() {
        let mut conn = test_conn();
        seed_discussion(&conn, "disc-1");
        insert_user(&conn, "panel-1", "panel");

        let tx = conn.transaction().expect("tx");
        reconcile(&tx, Context::Discussion, "disc-1", &["panel-1".into()]).expect("reconcile");
        tx.commit().expect("commit");

        let original_id: String = conn
            .query_row("SELECT id FROM assignments", [], |r| r.get(0))
            .expect("assignment id");

        deactivate(&conn, Context::Discussion, "disc-1", &original_id).expect("deactivate");
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM assignments WHERE is_active = 1"),
            0
        );

        let tx = conn.transaction().expect("tx");
        let added =
            reconcile(&tx, Context::Discussion, "disc-1", &["panel-1".into()]).expect("reconcile");
        tx.commit().expect("commit");
        assert_eq!(added, 1);

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM assignments"), 1);
        let (id, active): (String, i64) = conn
            .query_row("SELECT id, is_active FROM assignments", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .expect("assignment row");
        assert_eq!(id, original_id);
        assert_eq!(active, 1);
    }

    #[test]
    fn deactivate_missing_or_inactive_is_harmless() {
        let conn = test_conn();
        seed_discussion(&conn, "disc-1");

        deactivate(&conn, Context::Discussion, "disc-1", "no-such-assignment")
            .expect("deactivate unknown id");
        deactivate(&conn, Context::Discussion, "disc-1", "no-such-assignment")
            .expect("deactivate again");
    }
}

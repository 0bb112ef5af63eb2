use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_thesisd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn thesisd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn removing_unknown_or_already_inactive_assignments_succeeds() {
    let workspace = temp_dir("thesisd-remove-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "lastName": "Santos",
            "firstName": "Irene",
            "role": "admin",
            "college": "CCS",
            "status": "approved"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("admin userId")
    .to_string();
    let adviser_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "actorUserId": admin_id.clone(),
            "lastName": "Reyes",
            "firstName": "Ana",
            "role": "adviser",
            "college": "CCS",
            "status": "approved"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("adviser userId")
    .to_string();
    let group_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({
            "actorUserId": admin_id.clone(),
            "name": "Waste Audit Tracker",
            "college": "CCS",
            "adviserId": adviser_id.clone()
        }),
    )
    .get("groupId")
    .and_then(|v| v.as_str())
    .expect("groupId")
    .to_string();
    let submission_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "submissions.create",
        json!({
            "actorUserId": admin_id.clone(),
            "groupId": group_id,
            "kind": "title",
            "title": "Waste Audit Tracker"
        }),
    )
    .get("submissionId")
    .and_then(|v| v.as_str())
    .expect("submissionId")
    .to_string();

    // Unknown assignment id: still a success.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reviewers.unassign",
        json!({
            "actorUserId": admin_id.clone(),
            "submissionId": submission_id.clone(),
            "assignmentId": "no-such-assignment"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reviewers.assign",
        json!({
            "actorUserId": admin_id.clone(),
            "submissionId": submission_id.clone(),
            "reviewers": [adviser_id]
        }),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reviewers.listAssigned",
        json!({
            "actorUserId": admin_id.clone(),
            "submissionId": submission_id.clone()
        }),
    );
    let assignment_id = listing
        .get("reviewers")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|row| row.get("assignmentId"))
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    // Deactivate twice; the second call is a no-op, not an error.
    for req_id in ["9", "10"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "reviewers.unassign",
            json!({
                "actorUserId": admin_id.clone(),
                "submissionId": submission_id.clone(),
                "assignmentId": assignment_id.clone()
            }),
        );
    }

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "reviewers.listAssigned",
        json!({
            "actorUserId": admin_id,
            "submissionId": submission_id
        }),
    );
    assert_eq!(
        after
            .get("reviewers")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

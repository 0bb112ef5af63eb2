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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert_eq!(code, expected_code, "{}: {}", method, value);
}

#[test]
fn gate_and_validation_failures_never_touch_storage() {
    let workspace = temp_dir("thesisd-gate-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Nothing works before a workspace is selected.
    request_err(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({
            "lastName": "Santos",
            "firstName": "Irene",
            "role": "admin",
            "college": "CCS"
        }),
        "no_workspace",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // First user bootstraps without an actor; afterwards the gate applies.
    let admin_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
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

    request_err(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({
            "lastName": "Reyes",
            "firstName": "Ana",
            "role": "adviser",
            "college": "CCS"
        }),
        "bad_params",
    );

    let adviser_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
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

    // Non-admin actors are refused on administrative surfaces.
    request_err(
        &mut stdin,
        &mut reader,
        "6",
        "reviewers.listAvailable",
        json!({ "actorUserId": adviser_id.clone(), "college": "CCS" }),
        "forbidden",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "7",
        "users.create",
        json!({
            "actorUserId": adviser_id.clone(),
            "lastName": "Cruz",
            "firstName": "Maria",
            "role": "panel",
            "college": "CCS"
        }),
        "forbidden",
    );
    // The student-access path is closed to non-students.
    request_err(
        &mut stdin,
        &mut reader,
        "8",
        "discussions.open",
        json!({ "actorUserId": admin_id.clone(), "groupId": "whatever" }),
        "forbidden",
    );

    // Validation failures come back before any storage side effects.
    request_err(
        &mut stdin,
        &mut reader,
        "9",
        "discussions.addParticipants",
        json!({
            "actorUserId": admin_id.clone(),
            "discussionId": "d-1",
            "participants": []
        }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "10",
        "discussions.addParticipants",
        json!({
            "actorUserId": admin_id.clone(),
            "participants": [adviser_id.clone()]
        }),
        "bad_params",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "11",
        "discussions.addParticipants",
        json!({
            "actorUserId": admin_id.clone(),
            "discussionId": "   ",
            "participants": [adviser_id.clone()]
        }),
        "bad_params",
    );

    // Well-formed but unknown discussion id.
    request_err(
        &mut stdin,
        &mut reader,
        "12",
        "discussions.addParticipants",
        json!({
            "actorUserId": admin_id,
            "discussionId": "no-such-discussion",
            "participants": [adviser_id]
        }),
        "not_found",
    );

    request_err(
        &mut stdin,
        &mut reader,
        "13",
        "panel.defense.schedule",
        json!({}),
        "not_implemented",
    );
}

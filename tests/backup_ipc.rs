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

fn spawn_sidecar_with(envs: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut cmd = Command::new(exe);
    cmd.env_remove("SCHOOLD_WORKSPACE")
        .env_remove("SCHOOLD_NOTIFY_BACKEND")
        .env("SCHOOLD_LOG", "schoold=warn");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(&[])
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    actor: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(a) = actor {
        payload["actor"] = json!(a);
    }
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
    actor: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, actor, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct School {
    term_id: String,
    class_id: String,
    students: Vec<String>,
}

fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> School {
    request_ok(
        stdin,
        reader,
        "seed-1",
        None,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "seed-2",
        None,
        "users.bootstrap",
        json!({ "username": "admin" }),
    );
    request_ok(
        stdin,
        reader,
        "seed-3",
        Some("admin"),
        "users.create",
        json!({ "username": "bursar", "role": "BURSAR" }),
    );
    let session = request_ok(
        stdin,
        reader,
        "seed-4",
        Some("admin"),
        "sessions.create",
        json!({ "name": "2026/2027", "isCurrent": true }),
    );
    let term = request_ok(
        stdin,
        reader,
        "seed-5",
        Some("admin"),
        "terms.create",
        json!({ "sessionId": session["id"], "name": "Term 1", "isCurrent": true }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-6",
        Some("admin"),
        "classes.create",
        json!({ "name": "Form 1" }),
    );
    let mut students = Vec::new();
    for (i, (first, phone)) in [("Ada", "0711000001"), ("Bola", "0711000002")]
        .iter()
        .enumerate()
    {
        let s = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            Some("admin"),
            "students.create",
            json!({
                "admissionNumber": format!("ADM{:03}", i + 1),
                "firstName": first,
                "lastName": "Okafor",
                "classId": class["id"],
                "parentPhone": phone,
                "parentEmail": format!("{}@example.com", first.to_lowercase()),
            }),
        );
        students.push(s["id"].as_str().expect("student id").to_string());
    }
    School {
        term_id: term["id"].as_str().expect("term id").to_string(),
        class_id: class["id"].as_str().expect("class id").to_string(),
        students,
    }
}

fn create_fee(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    school: &School,
    amount: &str,
    description: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("fee-{}", description),
        Some("bursar"),
        "fees.create",
        json!({
            "termId": school.term_id,
            "classIds": [school.class_id],
            "amount": amount,
            "description": description,
        }),
    );
    created["feeSchedules"][0]["id"]
        .as_str()
        .expect("fee schedule id")
        .to_string()
}

fn balance_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
) -> String {
    let s = request_ok(
        stdin,
        reader,
        &format!("balance-{}", student_id),
        Some("bursar"),
        "students.get",
        json!({ "studentId": student_id }),
    );
    s["balance"].as_str().expect("balance").to_string()
}

#[test]
fn bundle_export_and_import_restore_the_ledger() {
    let workspace = temp_dir("schoold-backup-ipc");
    let out_dir = temp_dir("schoold-backup-ipc-out");
    let bundle = out_dir.join("school.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace);
    let ada = &school.students[0];

    let fee = create_fee(&mut stdin, &mut reader, &school, "4000", "Tuition");
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        Some("bursar"),
        "ledger.applyFeeSchedule",
        json!({ "feeScheduleId": fee }),
    );

    let bursar_export = request(
        &mut stdin,
        &mut reader,
        "2",
        Some("bursar"),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&bursar_export), "forbidden");

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        Some("admin"),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], "schoold-workspace-v1");
    assert_eq!(exported["sha256"].as_str().map(|s| s.len()), Some(64));
    assert!(bundle.is_file());

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some("bursar"),
        "ledger.recordPayment",
        json!({ "studentId": ada, "amount": "4000" }),
    );
    assert_eq!(balance_of(&mut stdin, &mut reader, ada), "0.00");

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        Some("admin"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["sha256"], exported["sha256"]);
    assert_eq!(balance_of(&mut stdin, &mut reader, ada), "4000.00");

    let garbage = out_dir.join("garbage.zip");
    std::fs::write(&garbage, b"not a zip").expect("write garbage");
    let rejected = request(
        &mut stdin,
        &mut reader,
        "6",
        Some("admin"),
        "backup.importWorkspaceBundle",
        json!({ "inPath": garbage.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "backup_failed");
    assert_eq!(balance_of(&mut stdin, &mut reader, ada), "4000.00");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

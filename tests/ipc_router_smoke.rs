mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("plannerd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert_eq!(health["result"]["workspacePath"], json!(null));

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let scope = json!({ "teacherId": "t1", "schoolYearId": "y1" });
    let calls = [
        ("plans.list", scope.clone()),
        ("plans.refresh", scope.clone()),
        ("plans.open", json!({ "key": "missing" })),
        ("plans.create", json!({ "teacherId": "t1", "schoolYearId": "y1", "date": "2024-01-08" })),
        ("plans.update", json!({ "key": "missing", "patch": {} })),
        ("plans.delete", json!({ "key": "missing" })),
        ("plans.duplicate", json!({ "key": "missing" })),
        ("plans.shift", json!({ "key": "missing", "direction": "forward" })),
        ("plans.week", json!({ "teacherId": "t1", "schoolYearId": "y1", "date": "2024-01-08" })),
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "calendar", "patch": {} })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("m{}", i), method, params);
        assert_ne!(error_code(&resp), Some("not_implemented"), "{}", method);
    }

    let unknown = request(&mut stdin, &mut reader, "9", "grades.list", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(error_code(&value), Some("bad_json"));

    let still_alive = request(&mut stdin, &mut reader, "10", "health", json!({}));
    assert_eq!(still_alive["ok"], json!(true));
}

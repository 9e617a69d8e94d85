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
    let exe = env!("CARGO_BIN_EXE_enrolld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn enrolld");
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
    value["result"].clone()
}

fn select_and_sign_in(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-2",
        "auth.bootstrap",
        json!({ "email": "admin@questo.com", "password": "libral@500" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-3",
        "auth.signIn",
        json!({ "email": "admin@questo.com", "password": "libral@500" }),
    );
}

fn submit_with_photo(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    blob_dir: &PathBuf,
) -> serde_json::Value {
    std::fs::write(blob_dir.join("kid.jpg"), b"student-jpeg").expect("write blob");
    request_ok(
        stdin,
        reader,
        "submit-1",
        "enrollments.submit",
        json!({
            "form": {
                "studentName": "Asha Rao",
                "grade": "Playschool",
                "board": "IGCSE",
                "academicYear": "2024-2025"
            },
            "studentPhoto": {
                "path": blob_dir.join("kid.jpg").to_string_lossy(),
                "name": "kid.jpg"
            },
            "contacts": [
                { "phone": "9820012345", "contactName": "Mina Rao", "relation": "parent" }
            ]
        }),
    )
}

#[test]
fn photo_export_copies_the_stored_blob() {
    let workspace = temp_dir("enrolld-photo-export");
    let blobs = temp_dir("enrolld-photo-export-blobs");
    let dest = temp_dir("enrolld-photo-export-dest");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_and_sign_in(&mut stdin, &mut reader, &workspace);
    let _ = submit_with_photo(&mut stdin, &mut reader, &blobs);

    let listing = request_ok(&mut stdin, &mut reader, "1", "enrollments.list", json!({}));
    let url = listing["enrollments"][0]["studentPhotoURL"]
        .as_str()
        .expect("photo url")
        .to_string();

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "photos.export",
        json!({
            "url": url,
            "destDir": dest.to_string_lossy(),
            "filename": "Asha Rao_photo.jpg"
        }),
    );
    let path = exported["path"].as_str().expect("export path");
    assert_eq!(std::fs::read(path).expect("exported file"), b"student-jpeg");

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "photos.export",
        json!({
            "url": "/photos/student_photos/0_nothing.jpg",
            "destDir": dest.to_string_lossy()
        }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
    for dir in [&workspace, &blobs, &dest] {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[test]
fn orphan_listing_reports_unreferenced_blobs_only() {
    let workspace = temp_dir("enrolld-orphans");
    let blobs = temp_dir("enrolld-orphans-blobs");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_and_sign_in(&mut stdin, &mut reader, &workspace);
    let _ = submit_with_photo(&mut stdin, &mut reader, &blobs);

    // A blob nothing references, as left behind by a failed document write.
    let stray_dir = workspace.join("photos").join("contact_photos");
    std::fs::create_dir_all(&stray_dir).expect("create stray dir");
    std::fs::write(stray_dir.join("17_stray.jpg"), b"stray").expect("write stray");

    let result = request_ok(&mut stdin, &mut reader, "1", "photos.orphans", json!({}));
    assert_eq!(result["orphans"], json!(["contact_photos/17_stray.jpg"]));
    assert_eq!(result["referenced"], json!(1));

    drop(stdin);
    let _ = child.wait();
    std::fs::remove_dir_all(&workspace).ok();
    std::fs::remove_dir_all(&blobs).ok();
}

#[test]
fn backup_roundtrip_restores_documents_and_photos() {
    let ws1 = temp_dir("enrolld-backup-src");
    let ws2 = temp_dir("enrolld-backup-dst");
    let blobs = temp_dir("enrolld-backup-blobs");
    let bundle = ws1.join("export").join("enrollments.bundle.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_and_sign_in(&mut stdin, &mut reader, &ws1);
    let _ = submit_with_photo(&mut stdin, &mut reader, &blobs);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("enroll-workspace-v1"));
    // manifest + db + one photo
    assert_eq!(exported["entryCount"], json!(3));
    assert!(bundle.is_file());

    // Restore into a second workspace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": ws2.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.bootstrap",
        json!({ "email": "admin@questo.com", "password": "libral@500" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signIn",
        json!({ "email": "admin@questo.com", "password": "libral@500" }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormat"], json!("enroll-workspace-v1"));
    assert_eq!(imported["photoCount"], json!(1));
    assert_eq!(imported["state"], json!("admin"));

    let listing = request_ok(&mut stdin, &mut reader, "6", "enrollments.list", json!({}));
    assert_eq!(listing["total"], json!(1));
    assert_eq!(listing["enrollments"][0]["studentName"], json!("Asha Rao"));

    // The restored photo store has no orphans: the blob is referenced again.
    let orphans = request_ok(&mut stdin, &mut reader, "7", "photos.orphans", json!({}));
    assert_eq!(orphans["orphans"], json!([]));

    drop(stdin);
    let _ = child.wait();
    for dir in [&ws1, &ws2, &blobs] {
        std::fs::remove_dir_all(dir).ok();
    }
}

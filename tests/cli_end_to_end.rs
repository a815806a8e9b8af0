use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn typecache() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_typecache"));
    cmd.env("RUST_LOG", "error");
    cmd
}

#[test]
fn key_resolves_templates_end_to_end() {
    let output = typecache()
        .args([
            "key",
            "{_model_}:{_fn_}:{owner.id}",
            "--model",
            "User",
            "--fn",
            "fullName",
            "--field",
            "owner.id=7",
        ])
        .output()
        .expect("binary runs");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "User:fullName:7");
}

#[test]
fn key_reports_unresolved_placeholders() {
    let output = typecache()
        .args(["key", "{_model_}:{id}", "--model", "User"])
        .output()
        .expect("binary runs");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("has no value"));
}

#[test]
fn decode_revives_timestamps_from_a_file() {
    let mut file = NamedTempFile::new().expect("tmp file");
    file.write_all(br#"{"at":"2024-03-01T12:30:45.123Z","gone":{"__cachedname":"Nobody"}}"#)
        .expect("write envelope");

    let output = typecache()
        .arg("decode")
        .arg(file.path())
        .output()
        .expect("binary runs");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Timestamp("), "stdout: {stdout}");
    assert!(!stdout.contains("gone"), "stdout: {stdout}");
}

#[test]
fn decode_rejects_malformed_envelopes() {
    let mut file = NamedTempFile::new().expect("tmp file");
    file.write_all(b"{\"at\":").expect("write envelope");

    let output = typecache()
        .arg("decode")
        .arg(file.path())
        .output()
        .expect("binary runs");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("malformed envelope"));
}

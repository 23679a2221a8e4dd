//! Integration tests for the keyward CLI
//!
//! These tests verify the CLI binary works correctly end-to-end.

#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn keyward() -> Command {
    Command::cargo_bin("keyward").unwrap()
}

#[test]
fn test_help_lists_exit_codes() {
    keyward()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("sdk-config"));
}

#[test]
fn test_master_db_key_is_32_bytes() {
    let output = keyward().args(["--quiet", "master-db-key"]).output().unwrap();
    assert!(output.status.success());
    let key = String::from_utf8(output.stdout).unwrap();
    // 32 bytes base64 encode to 44 characters
    assert_eq!(key.trim().len(), 44);
}

#[test]
fn test_keygen_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("device.json");
    std::fs::write(&path, "keep me").unwrap();

    keyward()
        .args(["keygen", "--output"])
        .arg(&path)
        .assert()
        .code(74)
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

    keyward().args(["keygen", "--force", "--output"]).arg(&path).assert().success();
    assert!(std::fs::read_to_string(&path).unwrap().contains("private_key"));
}

#[test]
fn test_sdk_config_encode_then_decode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("master.json");
    let public_key = keyward()
        .args(["--quiet", "keygen", "--output"])
        .arg(&path)
        .output()
        .unwrap();
    let public_key = String::from_utf8(public_key.stdout).unwrap().trim().to_string();

    // 16 zero bytes and 16 0xff bytes
    let app_key = "AAAAAAAAAAAAAAAAAAAAAA==";
    let app_secret = "/////////////////////w==";

    let blob = keyward()
        .args(["--quiet", "sdk-config", "encode"])
        .args(["--application-key", app_key])
        .args(["--application-secret", app_secret])
        .args(["--master-public-key", &public_key])
        .output()
        .unwrap();
    assert!(blob.status.success());
    let blob = String::from_utf8(blob.stdout).unwrap().trim().to_string();

    keyward()
        .args(["--quiet", "sdk-config", "decode", &blob])
        .assert()
        .success()
        .stdout(predicate::str::contains(app_key))
        .stdout(predicate::str::contains(app_secret))
        .stdout(predicate::str::contains(public_key.as_str()));
}

#[test]
fn test_sdk_config_decode_rejects_garbage() {
    keyward()
        .args(["sdk-config", "decode", "not-a-blob!"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Invalid SDK configuration"));
}

#[test]
fn test_sign_decimal_format() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.json");
    let server = dir.path().join("server.json");
    keyward().args(["keygen", "--output"]).arg(&device).assert().success();
    let server_public = keyward()
        .args(["--quiet", "keygen", "--output"])
        .arg(&server)
        .output()
        .unwrap();
    let server_public = String::from_utf8(server_public.stdout).unwrap().trim().to_string();

    let output = keyward()
        .args(["--quiet", "sign", "--key-file"])
        .arg(&device)
        .args(["--server-public-key", &server_public])
        .args(["--type", "possession_knowledge"])
        .args(["--counter", "7"])
        .args(["--data", "POST&/login"])
        .args(["--application-secret", "secret"])
        .args(["--format", "decimal"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let signature = String::from_utf8(output.stdout).unwrap();
    let parts: Vec<&str> = signature.trim().split('-').collect();
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|p| p.len() == 8 && p.chars().all(|c| c.is_ascii_digit())));
}

#[test]
fn test_sign_rejects_unknown_type() {
    let dir = tempdir().unwrap();
    let device = dir.path().join("device.json");
    keyward().args(["keygen", "--output"]).arg(&device).assert().success();

    keyward()
        .args(["sign", "--key-file"])
        .arg(&device)
        .args(["--server-public-key", "AAAA"])
        .args(["--type", "fingerprint"])
        .args(["--counter", "0", "--data", "x", "--application-secret", "s"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown signature type"));
}

#[test]
fn test_sign_missing_key_file() {
    keyward()
        .args(["sign", "--key-file", "/nonexistent/device.json"])
        .args(["--server-public-key", "AAAA", "--type", "possession"])
        .args(["--counter", "0", "--data", "x", "--application-secret", "s"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read key file"));
}

#[test]
fn test_verify_offline_rejects_unsigned_payload() {
    let dir = tempdir().unwrap();
    let key = dir.path().join("key.json");
    let public_key = keyward()
        .args(["--quiet", "keygen", "--output"])
        .arg(&key)
        .output()
        .unwrap();
    let public_key = String::from_utf8(public_key.stdout).unwrap().trim().to_string();

    let payload = dir.path().join("payload.txt");
    std::fs::write(&payload, "data\nnonce\n1AAAA").unwrap();

    keyward()
        .arg("verify-offline")
        .arg(&payload)
        .args(["--public-key", &public_key])
        .assert()
        .code(65);
}

mod util;

use assert_cmd::Command;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ledger_bridge_keyring::bridge::MockLedgerBridge;
use ledger_bridge_keyring::core::derivation::ExtendedPrivateKey;
use ledger_bridge_keyring::SerializedKeyring;
use serde_json::json;
use std::fs;
use tempfile::tempdir;
use util::TEST_SEED;

fn root_key_hex() -> (String, String) {
    let root = ExtendedPrivateKey::from_seed(&TEST_SEED)
        .unwrap()
        .derive_path("m/44'/60'/0'")
        .unwrap()
        .to_extended_public()
        .unwrap();
    (
        hex::encode(root.public_key().to_encoded_point(true).as_bytes()),
        hex::encode(root.chain_code()),
    )
}

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("ledger-keyring").unwrap();
    cmd.env_remove("LEDGER_HD_PATH").env_remove("LEDGER_REQUEST_TIMEOUT_SECS");
    cmd
}

#[test]
fn test_cli_path() {
    let output = cli()
        .args(["path", "--index", "2", "--hd-path", "m/44'/60'/0'/0/0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output).unwrap(), "m/44'/60'/2'/0/0\n");
}

#[test]
fn test_cli_derive_matches_device() {
    let (public_key, chain_code) = root_key_hex();
    let device = MockLedgerBridge::from_seed(&TEST_SEED).unwrap();

    let output = cli()
        .args(["derive", "--public-key", &public_key, "--chain-code", &chain_code, "--start", "1", "--count", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        format!("1\t{}\tm/44'/60'/0'/1", device.address_at("m/44'/60'/0'/1").unwrap())
    );
}

#[test]
fn test_cli_migrate_legacy_state() {
    let (public_key, chain_code) = root_key_hex();
    let device = MockLedgerBridge::from_seed(&TEST_SEED).unwrap();
    let known = device.address_at("m/44'/60'/0'/6").unwrap();

    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let out_path = dir.path().join("migrated.json");
    fs::write(
        &state_path,
        json!({
            "hdPath": "m/44'/60'/0'",
            "accounts": [known.to_lowercase(), "0x0000000000000000000000000000000000000def"]
        })
        .to_string(),
    )
    .unwrap();

    cli()
        .args([
            "migrate",
            "--state",
            state_path.to_str().unwrap(),
            "--public-key",
            &public_key,
            "--chain-code",
            &chain_code,
            "--output",
            out_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let migrated = SerializedKeyring::from_json(&fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(migrated.accounts, vec![known.clone()]);
    assert_eq!(migrated.account_details.unwrap()[&known].hd_path, "m/44'/60'/0'/6");
}

#[test]
fn test_cli_inspect() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    fs::write(
        &state_path,
        json!({
            "hdPath": "m/44'/60'/0'/0/0",
            "accounts": [address],
            "accountDetails": { address: { "hdPath": "m/44'/60'/0'/0/0", "bip44": true } },
            "bridgeUrl": "https://bridge.example",
            "implementFullBIP44": false
        })
        .to_string(),
    )
    .unwrap();

    let output = cli()
        .args(["inspect", "--state", state_path.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("hd path: m/44'/60'/0'/0/0"));
    assert!(text.contains("bridge: https://bridge.example"));
    assert!(text.contains(&format!("{}\tm/44'/60'/0'/0/0\tledger-live", address)));
}

#[test]
fn test_cli_inspect_missing_file_fails() {
    cli().args(["inspect", "--state", "/nonexistent/state.json"]).assert().failure();
}

//! Two settings, same query, same results.

use std::path::Path;

use e2e_tests::{banner, fake_server_config, fetch};
use harness_common::{HarnessError, Result};
use harness_server::{compare_settings, RemoteServer, ServerSetting};

fn models(server: &RemoteServer) -> Result<Vec<String>> {
    let (status, body) = fetch(&server.url_for(&["v1", "models"]))
        .map_err(|e| HarnessError::configuration(e.to_string()))?;
    Ok(vec![status.to_string(), body])
}

#[test]
fn test_equivalent_settings_match() {
    banner("Equivalent settings");

    let base = fake_server_config(Path::new(env!("CARGO_BIN_EXE_fake-server")));
    let first = ServerSetting::new(["--seed", "7"]);
    let second = ServerSetting::new(["--seed", "7"]).env("FAKE_SERVER_UNUSED", "1");

    let results = compare_settings(&base, &first, &second, models).unwrap();
    assert_eq!(results[0], "200");
}

#[test]
fn test_different_settings_are_reported() {
    banner("Diverging settings");

    let base = fake_server_config(Path::new(env!("CARGO_BIN_EXE_fake-server")));
    let first = ServerSetting::new(["--seed", "1"]);
    let second = ServerSetting::new(["--seed", "2"]);

    let err = compare_settings(&base, &first, &second, models).unwrap_err();
    match err {
        HarnessError::SettingsMismatch { index, detail } => {
            assert_eq!(index, 1);
            assert!(detail.contains("--seed"), "{}", detail);
        }
        other => panic!("expected SettingsMismatch, got {:?}", other),
    }
}

//! Startup failures: misuse, crashes and servers that never become healthy.

use std::path::Path;
use std::time::{Duration, Instant};

use e2e_tests::{banner, fake_server_config};
use harness_common::HarnessError;
use harness_server::RemoteServer;

fn fake_server() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_fake-server"))
}

#[test]
fn test_manual_port_conflicts_with_auto_port() {
    banner("Manual port with auto_port");

    for args in [vec!["--port", "8123"], vec!["-p", "8123"], vec!["--port=8123"]] {
        let start = Instant::now();
        let err = RemoteServer::start(fake_server_config(fake_server()).args(args.clone())).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }), "{:?}: {:?}", args, err);
        // No process was started, so nothing was waited for.
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}

#[test]
fn test_manual_port_without_auto_port() {
    banner("Manual port with auto_port disabled");

    let port = harness_process::reserve_open_port().unwrap();
    let config = fake_server_config(fake_server())
        .auto_port(false)
        .args(["--port".to_string(), port.port().to_string()]);

    let server = RemoteServer::start(config).unwrap();
    assert_eq!(server.port(), port.port());
}

#[test]
fn test_never_healthy_times_out_no_earlier_than_deadline() {
    banner("Startup timeout");

    let timeout = Duration::from_millis(1500);
    let interval = Duration::from_millis(100);
    let config = fake_server_config(fake_server())
        .arg("--never-healthy")
        .startup_timeout(timeout)
        .poll_interval(interval);

    let start = Instant::now();
    let err = RemoteServer::start(config).unwrap_err();
    let elapsed = start.elapsed();

    match err {
        HarnessError::ServerStartTimeout { last_error, .. } => {
            assert!(last_error.contains("503"), "{}", last_error);
        }
        other => panic!("expected ServerStartTimeout, got {:?}", other),
    }
    assert!(elapsed >= timeout, "gave up early after {:?}", elapsed);
    // One poll interval plus teardown slack.
    assert!(elapsed < timeout + interval + Duration::from_secs(4), "took {:?}", elapsed);
}

#[test]
fn test_crash_is_detected_within_one_interval() {
    banner("Crash before healthy");

    let interval = Duration::from_millis(100);
    let config = fake_server_config(fake_server())
        .args(["--never-healthy", "--crash-after-ms", "300", "--exit-code", "3"])
        .startup_timeout(Duration::from_secs(30))
        .poll_interval(interval);

    let start = Instant::now();
    let err = RemoteServer::start(config).unwrap_err();
    match err {
        HarnessError::ServerCrashed { exit_code, .. } => assert_eq!(exit_code, Some(3)),
        other => panic!("expected ServerCrashed, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
}

#[test]
fn test_clean_exit_before_healthy_is_not_a_crash() {
    banner("Exit code 0 before healthy");

    let timeout = Duration::from_millis(1200);
    let config = fake_server_config(fake_server())
        .args(["--never-healthy", "--crash-after-ms", "100", "--exit-code", "0"])
        .startup_timeout(timeout);

    let start = Instant::now();
    let err = RemoteServer::start(config).unwrap_err();
    assert!(matches!(err, HarnessError::ServerStartTimeout { .. }), "{:?}", err);
    assert!(start.elapsed() >= timeout);
}

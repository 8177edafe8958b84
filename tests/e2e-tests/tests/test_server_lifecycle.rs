//! Server lifecycle: start, address helpers, teardown on drop and on stop.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::time::{Duration, Instant};

use e2e_tests::assertions::assert_process_gone;
use e2e_tests::{banner, fake_server_config, fetch, FAKE_MODEL};
use harness_server::{RemoteServer, DUMMY_API_KEY};

fn fake_server() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_fake-server"))
}

#[test]
fn test_start_serves_health_and_models() -> Result<(), String> {
    banner("Server start and address helpers");

    let server = RemoteServer::start(fake_server_config(fake_server())).map_err(|e| e.to_string())?;
    println!("✓ Server healthy at {} after {:?}\n", server.url_root(), server.startup_time());

    assert_eq!(server.host(), "localhost");
    assert_eq!(server.url_root(), format!("http://localhost:{}", server.port()));
    assert_eq!(server.api_base(), format!("{}/v1", server.url_root()));
    assert_eq!(server.api_key(), DUMMY_API_KEY);

    let (status, _) = fetch(&server.url_for(&["health"])).map_err(|e| e.to_string())?;
    assert_eq!(status, 200);

    let (status, body) = fetch(&server.url_for(&["v1", "models"])).map_err(|e| e.to_string())?;
    assert_eq!(status, 200);
    assert!(body.contains(FAKE_MODEL), "unexpected body: {}", body);
    Ok(())
}

#[test]
fn test_drop_tears_server_down() -> Result<(), String> {
    banner("Teardown on scope exit");

    let pid = {
        let server = RemoteServer::start(fake_server_config(fake_server())).map_err(|e| e.to_string())?;
        server.pid()
    };
    assert_process_gone(pid, Duration::from_secs(1))?;
    println!("✓ Server {} gone after drop\n", pid);
    Ok(())
}

#[test]
fn test_drop_during_panic_tears_server_down() -> Result<(), String> {
    banner("Teardown while unwinding");

    let (tx, rx) = std::sync::mpsc::channel();
    let handle = std::thread::spawn(move || {
        let server = RemoteServer::start(fake_server_config(fake_server())).unwrap();
        tx.send(server.pid()).unwrap();
        panic!("test body failed while server {} was running", server.pid());
    });
    assert!(handle.join().is_err());

    let pid = rx.recv().map_err(|e| e.to_string())?;
    assert_process_gone(pid, Duration::from_secs(1))?;
    Ok(())
}

#[test]
fn test_stop_is_graceful() -> Result<(), String> {
    banner("Explicit graceful stop");

    let mut server = RemoteServer::start(fake_server_config(fake_server())).map_err(|e| e.to_string())?;
    assert!(server.is_running());

    let status = server.stop().map_err(|e| e.to_string())?;
    // The fake server exits 0 on SIGTERM.
    assert!(status.success(), "unexpected status {}", status);
    Ok(())
}

#[test]
fn test_stop_escalates_to_sigkill() -> Result<(), String> {
    banner("Stop escalates when SIGTERM is ignored");

    let shutdown_timeout = Duration::from_millis(500);
    let config = fake_server_config(fake_server())
        .arg("--ignore-sigterm")
        .shutdown_timeout(shutdown_timeout);
    let server = RemoteServer::start(config).map_err(|e| e.to_string())?;

    let start = Instant::now();
    let status = server.stop().map_err(|e| e.to_string())?;
    assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGKILL as i32));
    assert!(start.elapsed() >= shutdown_timeout);
    println!("✓ Force killed after {:?}\n", start.elapsed());
    Ok(())
}

#[test]
fn test_slow_startup_is_waited_for() -> Result<(), String> {
    banner("Slow startup");

    let config = fake_server_config(fake_server()).args(["--startup-delay-ms", "700"]);
    let server = RemoteServer::start(config).map_err(|e| e.to_string())?;
    assert!(server.startup_time() >= Duration::from_millis(700));
    Ok(())
}

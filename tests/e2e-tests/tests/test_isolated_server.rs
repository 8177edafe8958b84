//! An isolated test that leaks a server and its children leaves nothing
//! behind.

use std::fs;
use std::path::Path;
use std::time::Duration;

use e2e_tests::assertions::{assert_group_empty, assert_process_gone};
use e2e_tests::{banner, fake_server_config};
use harness_isolation::{test_path, IsolatedTest, WorkerStrategy, ISOLATED_WORKER_ENV};
use harness_server::RemoteServer;

/// PID of the runner, seen from either side of the re-exec.
fn runner_pid() -> u32 {
    if std::env::var_os(ISOLATED_WORKER_ENV).is_some() {
        nix::unistd::getppid().as_raw() as u32
    } else {
        std::process::id()
    }
}

#[test]
fn test_leaked_server_is_cleaned_up() -> Result<(), String> {
    banner("Isolated test leaking a server");

    let dir = std::env::temp_dir().join(format!("harness-e2e-isolated-{}", runner_pid()));
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let server_pid_file = dir.join("server.pid");
    let orphan_pid_file = dir.join("orphan.pid");

    let result = IsolatedTest::new(test_path(module_path!(), "test_leaked_server_is_cleaned_up"))
        .strategy(WorkerStrategy::Reexec)
        .run(|| {
            let config = fake_server_config(Path::new(env!("CARGO_BIN_EXE_fake-server")))
                .arg("--spawn-orphan")
                .arg(orphan_pid_file.display().to_string());
            let server = RemoteServer::start(config).unwrap();
            fs::write(&server_pid_file, server.pid().to_string()).unwrap();
            // Skip the handle's teardown; group cleanup has to catch it.
            std::mem::forget(server);
        })
        .map_err(|e| e.to_string())?;

    assert!(result.is_success(), "worker {}", result.exit);
    assert_group_empty(result.process_group)?;

    for file in [&server_pid_file, &orphan_pid_file] {
        let pid: u32 = fs::read_to_string(file)
            .map_err(|e| e.to_string())?
            .trim()
            .parse()
            .map_err(|e| format!("{:?}", e))?;
        assert_process_gone(pid, Duration::from_secs(2))?;
    }
    let _ = fs::remove_dir_all(&dir);
    println!("✓ Server and orphan gone\n");
    Ok(())
}

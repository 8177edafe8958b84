//! Concurrent harnesses never share an auto-assigned port.

use std::path::Path;
use std::thread;

use e2e_tests::assertions::assert_all_distinct;
use e2e_tests::{banner, fake_server_config};
use harness_server::RemoteServer;

#[test]
fn test_concurrent_servers_get_distinct_ports() -> Result<(), String> {
    banner("Distinct auto ports");

    let binary = Path::new(env!("CARGO_BIN_EXE_fake-server"));
    let servers: Vec<RemoteServer> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| RemoteServer::start(fake_server_config(binary))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "start thread panicked".to_string()))
            .collect::<Result<Vec<_>, String>>()
    })?
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| e.to_string())?;

    let ports: Vec<u16> = servers.iter().map(RemoteServer::port).collect();
    assert_all_distinct(&ports)?;
    println!("✓ Ports: {:?}\n", ports);
    Ok(())
}

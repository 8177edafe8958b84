//! Ephemeral port allocation.
//!
//! The OS picks a free port when binding to port 0; the socket is closed
//! right away so the server under test can bind it. Closing opens a window in
//! which another harness in the same test session could be handed the same
//! port, so every handed-out port is recorded in a session-wide registry
//! until its [`PortReservation`] is dropped.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};

use harness_common::{ProcessError, ProcessResult};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::debug;

const MAX_ALLOCATION_ATTEMPTS: usize = 64;

lazy_static! {
    /// Ports currently held by a live reservation in this process.
    static ref RESERVED_PORTS: Mutex<HashSet<u16>> = Mutex::new(HashSet::new());
}

/// A port that no other reservation in this process will receive until this
/// value is dropped.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PortReservation {
    port: u16,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        RESERVED_PORTS.lock().remove(&self.port);
        debug!("Released port reservation {}", self.port);
    }
}

/// Ask the OS for a currently unbound TCP port.
pub fn get_open_port() -> ProcessResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| ProcessError::port_allocation(format!("bind failed: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| ProcessError::port_allocation(format!("local_addr failed: {}", e)))?
        .port();
    Ok(port)
}

/// Allocate an unbound port that is not reserved by anyone else in this
/// process.
pub fn reserve_open_port() -> ProcessResult<PortReservation> {
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let port = get_open_port()?;
        if RESERVED_PORTS.lock().insert(port) {
            debug!("Reserved port {}", port);
            return Ok(PortReservation { port });
        }
        debug!("Port {} already reserved in this session, retrying", port);
    }

    Err(ProcessError::port_allocation(format!(
        "no unreserved port after {} attempts",
        MAX_ALLOCATION_ATTEMPTS
    )))
}

/// Whether `port` is currently held by a reservation in this process.
pub fn is_reserved(port: u16) -> bool {
    RESERVED_PORTS.lock().contains(&port)
}

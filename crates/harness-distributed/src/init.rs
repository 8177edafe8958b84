//! Per-rank distributed initialization.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use harness_common::{HarnessError, RankAssignment, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

/// How long ranks wait for each other at the rendezvous.
pub const DEFAULT_RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(60);

const RETRY_INTERVAL: Duration = Duration::from_millis(20);
const RELEASE: u8 = 0x01;

/// Sets up the process-group state a rank needs before running its test.
pub trait DistributedInitializer: Send + Sync {
    fn init_distributed_environment(
        &self,
        world_size: usize,
        rank: usize,
        init_method: &str,
        local_rank: Option<usize>,
    ) -> Result<()>;

    fn ensure_model_parallel_initialized(&self, _tp_size: usize, _pp_size: usize) -> Result<()> {
        Ok(())
    }
}

/// Initialize one rank: join the `tcp://localhost:<port>` rendezvous, then set
/// up tensor/pipeline parallel groups.
pub fn init_test_distributed_environment<I: DistributedInitializer + ?Sized>(
    initializer: &I,
    assignment: &RankAssignment,
) -> Result<()> {
    let world_size = assignment.world_size();
    if assignment.rank >= world_size {
        return Err(HarnessError::configuration(format!(
            "rank {} outside world of size {}",
            assignment.rank, world_size
        )));
    }

    initializer.init_distributed_environment(
        world_size,
        assignment.rank,
        &assignment.init_method(),
        assignment.local_rank,
    )?;
    initializer.ensure_model_parallel_initialized(assignment.tp_size, assignment.pp_size)
}

/// Rendezvous over the shared TCP port: rank 0 listens, every other rank
/// connects and announces itself, and rank 0 releases everyone once the
/// whole world has arrived.
#[derive(Debug)]
pub struct TcpBarrierInitializer {
    timeout: Duration,
    world_size: Mutex<Option<usize>>,
}

impl Default for TcpBarrierInitializer {
    fn default() -> Self {
        Self::new(DEFAULT_RENDEZVOUS_TIMEOUT)
    }
}

impl TcpBarrierInitializer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            world_size: Mutex::new(None),
        }
    }

    fn lead(&self, address: &str, world_size: usize, deadline: Instant) -> Result<()> {
        let listener = TcpListener::bind(address).map_err(|e| {
            HarnessError::rank_failed(0, format!("rendezvous bind {}: {}", address, e))
        })?;
        listener.set_nonblocking(true)?;

        let mut peers = Vec::with_capacity(world_size - 1);
        while peers.len() < world_size - 1 {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(remaining(deadline, 0)?))?;
                    let mut rank = [0u8; 8];
                    stream.read_exact(&mut rank)?;
                    debug!("Rendezvous: rank {} arrived", u64::from_le_bytes(rank));
                    peers.push(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let left = remaining(deadline, 0).map_err(|_| {
                        HarnessError::rank_failed(
                            0,
                            format!(
                                "rendezvous timed out with {} of {} rank(s) arrived",
                                peers.len() + 1,
                                world_size
                            ),
                        )
                    })?;
                    thread::sleep(RETRY_INTERVAL.min(left));
                }
                Err(e) => return Err(e.into()),
            }
        }

        for stream in &mut peers {
            stream.write_all(&[RELEASE])?;
        }
        Ok(())
    }

    fn follow(&self, address: &str, rank: usize, deadline: Instant) -> Result<()> {
        let mut stream = loop {
            match TcpStream::connect(address) {
                Ok(stream) => break stream,
                // Rank 0 may not be listening yet.
                Err(e) => {
                    let left = remaining(deadline, rank).map_err(|_| {
                        HarnessError::rank_failed(rank, format!("rendezvous connect {}: {}", address, e))
                    })?;
                    thread::sleep(RETRY_INTERVAL.min(left));
                }
            }
        };

        stream.write_all(&(rank as u64).to_le_bytes())?;
        stream.set_read_timeout(Some(remaining(deadline, rank)?))?;
        let mut release = [0u8; 1];
        stream.read_exact(&mut release).map_err(|e| {
            HarnessError::rank_failed(rank, format!("waiting for rendezvous release: {}", e))
        })?;
        if release[0] != RELEASE {
            return Err(HarnessError::rank_failed(rank, "unexpected rendezvous release byte"));
        }
        Ok(())
    }
}

impl DistributedInitializer for TcpBarrierInitializer {
    fn init_distributed_environment(
        &self,
        world_size: usize,
        rank: usize,
        init_method: &str,
        _local_rank: Option<usize>,
    ) -> Result<()> {
        let address = init_method.strip_prefix("tcp://").ok_or_else(|| {
            HarnessError::configuration(format!("unsupported init method: {}", init_method))
        })?;
        let deadline = Instant::now() + self.timeout;

        if world_size > 1 {
            if rank == 0 {
                self.lead(address, world_size, deadline)?;
            } else {
                self.follow(address, rank, deadline)?;
            }
        }

        *self.world_size.lock() = Some(world_size);
        info!("Rank {}/{} passed rendezvous at {}", rank, world_size, init_method);
        Ok(())
    }

    fn ensure_model_parallel_initialized(&self, tp_size: usize, pp_size: usize) -> Result<()> {
        match *self.world_size.lock() {
            None => Err(HarnessError::configuration(
                "distributed environment is not initialized",
            )),
            Some(world) if world != tp_size * pp_size => Err(HarnessError::configuration(format!(
                "tp={} x pp={} does not match world size {}",
                tp_size, pp_size, world
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn remaining(deadline: Instant, rank: usize) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(HarnessError::rank_failed(rank, "rendezvous timed out"))
    } else {
        Ok(left)
    }
}

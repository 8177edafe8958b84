//! Ranks as separate OS processes.
//!
//! Each worker receives its [`RankAssignment`] as JSON in
//! [`RANK_ASSIGNMENT_ENV`]. Worker stderr is echoed with a rank prefix and
//! its tail kept as the failure text.

use std::collections::VecDeque;
use std::env;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use harness_common::{HarnessError, ProcessError, RankAssignment, Result};
use tracing::{debug, warn};

use crate::executor::{RankOutcome, TaskExecutor};

/// Environment variable carrying a worker's assignment.
pub const RANK_ASSIGNMENT_ENV: &str = "HARNESS_RANK_ASSIGNMENT";

const STDERR_TAIL_LINES: usize = 20;

/// Read this worker's assignment from the environment.
pub fn rank_assignment_from_env() -> Result<RankAssignment> {
    let raw = env::var(RANK_ASSIGNMENT_ENV).map_err(|_| {
        HarnessError::configuration(format!("{} is not set", RANK_ASSIGNMENT_ENV))
    })?;
    RankAssignment::from_json(&raw).map_err(|e| {
        HarnessError::configuration(format!("invalid {}: {}", RANK_ASSIGNMENT_ENV, e))
    })
}

/// Program every rank runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

struct RankProcess {
    rank: usize,
    child: Child,
    stderr: Option<JoinHandle<VecDeque<String>>>,
}

#[derive(Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
    running: Vec<RankProcess>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskExecutor for ProcessExecutor {
    type Entry = WorkerCommand;

    fn name(&self) -> &'static str {
        "processes"
    }

    fn init(&mut self, working_dir: &Path) -> Result<()> {
        if !working_dir.is_dir() {
            return Err(HarnessError::configuration(format!(
                "working directory {} does not exist",
                working_dir.display()
            )));
        }
        self.working_dir = Some(working_dir.to_path_buf());
        Ok(())
    }

    fn submit(&mut self, entry: &WorkerCommand, assignment: RankAssignment) -> Result<()> {
        let rank = assignment.rank;
        let json = assignment
            .to_json()
            .map_err(|e| HarnessError::configuration(format!("rank {} assignment: {}", rank, e)))?;

        let mut command = Command::new(&entry.program);
        command
            .args(&entry.args)
            .env(RANK_ASSIGNMENT_ENV, json)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            ProcessError::spawn_failed(
                format!("rank-{}", rank),
                format!("{}: {}", entry.program.display(), e),
            )
        })?;
        debug!("Submitted rank {} as PID {}", rank, child.id());

        // Drained on a thread so a chatty rank never blocks on a full pipe.
        let stderr = child.stderr.take().map(|pipe| {
            thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                    eprintln!("[rank {}] {}", rank, line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        self.running.push(RankProcess { rank, child, stderr });
        Ok(())
    }

    fn join_all(&mut self) -> Vec<(usize, RankOutcome)> {
        self.running
            .drain(..)
            .map(|mut process| {
                let status = process.child.wait();
                let tail = process
                    .stderr
                    .take()
                    .and_then(|reader| reader.join().ok())
                    .map(|lines| Vec::from(lines).join("\n"))
                    .unwrap_or_default();

                let outcome = match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) if tail.is_empty() => Err(status.to_string()),
                    Ok(status) => Err(format!("{}: {}", status, tail)),
                    Err(e) => Err(format!("wait failed: {}", e)),
                };
                (process.rank, outcome)
            })
            .collect()
    }

    fn shutdown(&mut self) {
        for mut process in self.running.drain(..) {
            warn!("Killing unjoined rank {} (PID {})", process.rank, process.child.id());
            let _ = process.child.kill();
            let _ = process.child.wait();
            if let Some(reader) = process.stderr.take() {
                let _ = reader.join();
            }
        }
        self.working_dir = None;
    }
}

//! Reading `--host` / `--port` back out of a server argument list.
//!
//! Both `--flag value` and `--flag=value` forms are recognized; when a flag
//! appears more than once the last occurrence wins.

use harness_common::{HarnessError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;

const PORT_FLAGS: &[&str] = &["-p", "--port"];
const HOST_FLAGS: &[&str] = &["--host"];

/// True when the caller already chose a port.
pub fn has_port_flag<S: AsRef<str>>(args: &[S]) -> bool {
    args.iter().any(|arg| {
        let arg = arg.as_ref();
        PORT_FLAGS
            .iter()
            .any(|flag| arg == *flag || arg.starts_with(&format!("{}=", flag)))
    })
}

/// Value of `--host`, or [`DEFAULT_HOST`].
pub fn parse_host<S: AsRef<str>>(args: &[S]) -> String {
    last_value(args, HOST_FLAGS).unwrap_or_else(|| DEFAULT_HOST.to_string())
}

/// Value of `--port` / `-p`, or [`DEFAULT_PORT`].
pub fn parse_port<S: AsRef<str>>(args: &[S]) -> Result<u16> {
    match last_value(args, PORT_FLAGS) {
        Some(value) => value
            .parse()
            .map_err(|_| HarnessError::configuration(format!("invalid port: {:?}", value))),
        None => Ok(DEFAULT_PORT),
    }
}

fn last_value<S: AsRef<str>>(args: &[S], flags: &[&str]) -> Option<String> {
    let mut found = None;
    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        for flag in flags {
            if arg == *flag {
                if let Some(value) = iter.clone().next() {
                    found = Some(value.to_string());
                }
            } else if let Some(value) = arg.strip_prefix(flag).and_then(|v| v.strip_prefix('=')) {
                found = Some(value.to_string());
            }
        }
    }
    found
}

//! What runs inside the worker process.

use std::any::Any;
use std::fmt::Debug;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

/// Exit code of a worker whose body passed or skipped.
pub const EXIT_PASSED: i32 = 0;

/// Exit code of a worker whose body panicked or returned an error.
pub const EXIT_FAILED: i32 = 1;

/// Panic payload that marks a test as skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip(pub String);

/// Skip the current test. Inside an isolated worker this ends the worker
/// with exit code 0.
pub fn skip(reason: impl Into<String>) -> ! {
    panic::panic_any(Skip(reason.into()))
}

/// Return types a test body may have.
pub trait TestReturn {
    fn into_outcome(self) -> Result<(), String>;
}

impl TestReturn for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: Debug> TestReturn for Result<(), E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map_err(|e| format!("{:?}", e))
    }
}

/// Run `body` and map the outcome to an exit code.
///
/// Everything is written to the process's stdout/stderr handles rather than
/// through `println!`: inside a test harness those macros land in the test
/// thread's capture buffer, which a forked worker never gets to flush.
pub(crate) fn run_body<F, R>(test: &str, body: F) -> i32
where
    F: FnOnce() -> R,
    R: TestReturn,
{
    // Skips are not failures and are not reported by the hook.
    let previous = panic::take_hook();
    panic::set_hook(Box::new(|info| {
        if info.payload().downcast_ref::<Skip>().is_some() {
            return;
        }
        let location = info
            .location()
            .map(|l| format!(" at {}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let _ = writeln!(
            io::stderr().lock(),
            "worker panicked{}: {}",
            location,
            panic_message(info.payload())
        );
    }));

    let code = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => match value.into_outcome() {
            Ok(()) => EXIT_PASSED,
            Err(message) => {
                let _ = writeln!(io::stderr().lock(), "{} failed: {}", test, message);
                EXIT_FAILED
            }
        },
        Err(payload) => match payload.downcast_ref::<Skip>() {
            Some(Skip(reason)) => {
                let _ = writeln!(io::stdout().lock(), "{} skipped: {}", test, reason);
                EXIT_PASSED
            }
            None => {
                let _ = writeln!(
                    io::stderr().lock(),
                    "{} panicked: {}",
                    test,
                    panic_message(payload.as_ref())
                );
                EXIT_FAILED
            }
        },
    };

    panic::set_hook(previous);

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    code
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // The panic hook is process-wide, so these run one at a time.

    #[test]
    #[serial]
    fn test_exit_code_mapping() {
        assert_eq!(run_body("pass", || ()), EXIT_PASSED);
        assert_eq!(run_body("ok", || Ok::<(), String>(())), EXIT_PASSED);
        assert_eq!(run_body("err", || Err::<(), _>("boom")), EXIT_FAILED);
        // Diverging bodies name their return type explicitly.
        assert_eq!(run_body::<_, ()>("panic", || panic!("boom")), EXIT_FAILED);
        assert_eq!(run_body::<_, ()>("skip", || skip("no GPU")), EXIT_PASSED);
    }

    #[test]
    #[serial]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");

        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}

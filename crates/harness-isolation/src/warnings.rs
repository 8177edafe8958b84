//! Fail a test scope that logs a warning.
//!
//! ```rust
//! use harness_isolation::error_on_warning;
//!
//! let sum = error_on_warning(|| 1 + 1).unwrap();
//! assert_eq!(sum, 2);
//!
//! let err = error_on_warning(|| tracing::warn!("deprecated flag")).unwrap_err();
//! assert!(err.to_string().contains("deprecated flag"));
//! ```

use std::fmt;
use std::sync::Arc;

use harness_common::{HarnessError, Result};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

#[derive(Debug, Default)]
struct Recorded {
    count: usize,
    first: Option<String>,
}

/// Counts `WARN` and `ERROR` events and keeps the first one.
struct WarningRecorder(Arc<Mutex<Recorded>>);

impl<S: Subscriber> Layer<S> for WarningRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > Level::WARN {
            return;
        }

        let mut recorded = self.0.lock();
        recorded.count += 1;
        if recorded.first.is_none() {
            let mut fields = EventFields::default();
            event.record(&mut fields);
            recorded.first = Some(format!("{} {}: {}", meta.level(), meta.target(), fields.0));
        }
    }
}

#[derive(Default)]
struct EventFields(String);

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!("{}={:?}", field.name(), value));
        }
    }
}

/// Run `body` and fail with [`HarnessError::WarningEmitted`] if it logged
/// any `WARN` or `ERROR` event.
///
/// Events are still printed through the test writer. Only events emitted
/// on the calling thread are seen; a panic in `body` propagates unchanged.
pub fn error_on_warning<F, R>(body: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let subscriber = Registry::default()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(WarningRecorder(Arc::clone(&recorded)));

    let value = tracing::subscriber::with_default(subscriber, body);

    let recorded = recorded.lock();
    match recorded.first {
        Some(ref first) => Err(HarnessError::WarningEmitted {
            count: recorded.count,
            first: first.clone(),
        }),
        None => Ok(value),
    }
}

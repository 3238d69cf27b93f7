//! Routes failures that have no waiting caller to the event bus.

use std::sync::Arc;

use drmkeys_core::{ErrorKind, KeySystemError};

use crate::events::{ErrorEvent, ErrorSink};

#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn ErrorSink>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    /// Log and publish `err`.
    pub fn report(&self, err: &KeySystemError) {
        if err.fatal {
            tracing::error!("{}", err);
        } else {
            tracing::warn!("{}", err);
        }
        self.sink.emit(ErrorEvent::from(err));
    }

    /// Publish a failure of `kind` with its default fatality.
    pub fn report_kind(&self, kind: ErrorKind, message: impl Into<String>) {
        self.report(&KeySystemError::new(kind, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ErrorLog;

    #[test]
    fn test_report_kind_uses_default_fatality() {
        let log = Arc::new(ErrorLog::new());
        let reporter = ErrorReporter::new(log.clone());

        reporter.report_kind(ErrorKind::DestroyCloseSessionError, "could not close session");
        reporter.report_kind(ErrorKind::StatusInternalError, "key status changed");

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(!events[0].fatal);
        assert!(events[1].fatal);
    }
}

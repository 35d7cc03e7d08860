//! Log records and the bounded write path into the log exporter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::observability::spans::{AttributeValue, SpanContext};

/// Default number of records buffered ahead of the log exporter.
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 2048;

/// Log severity, numbered as in the OTLP data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn number(&self) -> u8 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

impl From<Severity> for opentelemetry::logs::Severity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Trace => opentelemetry::logs::Severity::Trace,
            Severity::Debug => opentelemetry::logs::Severity::Debug,
            Severity::Info => opentelemetry::logs::Severity::Info,
            Severity::Warn => opentelemetry::logs::Severity::Warn,
            Severity::Error => opentelemetry::logs::Severity::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub time: SystemTime,
    pub scope: String,
    pub severity: Severity,
    pub body: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Hex trace id, as written on the event or taken from a span.
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl LogRecord {
    pub fn new(scope: impl Into<String>, severity: Severity, body: impl Into<String>) -> Self {
        Self {
            time: SystemTime::now(),
            scope: scope.into(),
            severity,
            body: body.into(),
            attributes: BTreeMap::new(),
            trace_id: None,
            span_id: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Tie the record to a span for log/trace joins.
    pub fn with_span(mut self, context: &SpanContext) -> Self {
        self.trace_id = Some(context.trace_id.to_string());
        self.span_id = Some(context.span_id.to_string());
        self
    }
}

/// Shared slot holding the bounded sender into the log exporter.
///
/// Empty before initialization and after shutdown; records written then are
/// discarded. Records written while the queue is full are dropped and
/// counted.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    slot: Arc<RwLock<Option<mpsc::Sender<LogRecord>>>>,
    dropped: Arc<AtomicU64>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the record was discarded. Never blocks.
    pub fn emit(&self, record: LogRecord) -> bool {
        let slot = self.slot.read().expect("log sink lock poisoned");
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Records lost to a full queue or to an abandoned exporter.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_attached(&self) -> bool {
        self.slot.read().expect("log sink lock poisoned").is_some()
    }

    pub(crate) fn attach(&self, tx: mpsc::Sender<LogRecord>) {
        *self.slot.write().expect("log sink lock poisoned") = Some(tx);
    }

    /// Closing the only sender lets the exporter drain and stop.
    pub(crate) fn detach(&self) {
        self.slot.write().expect("log sink lock poisoned").take();
    }

    pub(crate) fn count_dropped(&self, records: u64) {
        self.dropped.fetch_add(records, Ordering::Relaxed);
    }
}

/// Named logger writing straight to the log exporter.
#[derive(Debug, Clone)]
pub struct Logger {
    scope: String,
    sink: LogSink,
}

impl Logger {
    pub fn new(scope: impl Into<String>, sink: LogSink) -> Self {
        Self {
            scope: scope.into(),
            sink,
        }
    }

    pub fn record(&self, severity: Severity, body: impl Into<String>) -> LogRecord {
        LogRecord::new(self.scope.clone(), severity, body)
    }

    pub fn emit(&self, record: LogRecord) -> bool {
        self.sink.emit(record)
    }

    pub fn info(&self, body: impl Into<String>) -> bool {
        self.emit(self.record(Severity::Info, body))
    }

    pub fn warn(&self, body: impl Into<String>) -> bool {
        self.emit(self.record(Severity::Warn, body))
    }

    pub fn error(&self, body: impl Into<String>) -> bool {
        self.emit(self.record(Severity::Error, body))
    }
}

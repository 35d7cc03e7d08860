//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Forward application events to the OTLP log exporter through the
//!   bounded log queue
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level from `RUST_LOG` when set, else from config
//! - The bridge only forwards events from application targets, never from the
//!   telemetry core or HTTP client internals, so exporting cannot log itself

use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::observability::error::TelemetryError;
use crate::observability::logs::{LogRecord, LogSink, Severity};
use crate::observability::spans::AttributeValue;

/// Targets whose events the bridge never forwards.
const EXCLUDED_TARGETS: &[&str] = &["observe_relay::observability"];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `observe_relay=debug,tower_http=info`.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Install the global subscriber. `bridge` adds the OTLP log layer.
pub fn init_logging(config: &LogConfig, bridge: Option<OtlpLogLayer>) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| TelemetryError::LoggingInit(format!("invalid log level: {e}")))?,
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(bridge)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// `tracing` layer turning events into OTLP log records.
///
/// `trace_id` and `span_id` fields on an event become the record's
/// correlation ids; `message` becomes the body; everything else becomes an
/// attribute.
#[derive(Debug, Clone)]
pub struct OtlpLogLayer {
    sink: LogSink,
    targets: Vec<String>,
}

impl OtlpLogLayer {
    /// Forward events whose target is one of `targets` or a submodule of one.
    pub fn new(sink: LogSink, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sink,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn forwards(&self, target: &str) -> bool {
        let under = |root: &str| {
            target
                .strip_prefix(root)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        };
        !EXCLUDED_TARGETS.iter().any(|t| under(t)) && self.targets.iter().any(|t| under(t))
    }

    fn to_record(event: &Event<'_>) -> LogRecord {
        let meta = event.metadata();
        let mut record = LogRecord::new(meta.target(), Severity::from(meta.level()), "");
        event.record(&mut RecordVisitor {
            record: &mut record,
        });
        record
    }
}

impl<S: Subscriber> Layer<S> for OtlpLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.forwards(event.metadata().target()) {
            return;
        }
        self.sink.emit(Self::to_record(event));
    }
}

struct RecordVisitor<'a> {
    record: &'a mut LogRecord,
}

impl RecordVisitor<'_> {
    fn text(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.record.body = value,
            "trace_id" => self.record.trace_id = Some(value),
            "span_id" => self.record.span_id = Some(value),
            name => {
                self.record
                    .attributes
                    .insert(name.to_string(), AttributeValue::String(value));
            }
        }
    }

    fn value(&mut self, field: &Field, value: AttributeValue) {
        self.record.attributes.insert(field.name().to_string(), value);
    }
}

impl Visit for RecordVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.text(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.value(field, AttributeValue::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.value(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.value(field, AttributeValue::Double(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.value(field, AttributeValue::Bool(value));
    }
}

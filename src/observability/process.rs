//! Process-wide telemetry lifecycle.
//!
//! # Responsibilities
//! - Build the resource and the exporter set exactly once
//! - Start the tracer provider (batch processor), meter provider (periodic
//!   reader) and logger provider (fed from a bounded queue)
//! - Hand out span trackers, meters and loggers
//! - Drain traces, then metrics, then logs on shutdown
//!
//! # Design Decisions
//! - Explicit object passed by `Arc`, no ambient global
//! - State lives in a `watch` channel so concurrent shutdown callers can
//!   wait for the first one to finish
//! - SDK flush and shutdown calls block, so each runs on the blocking pool
//!   under a timeout; a stuck exporter is abandoned, not awaited

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, TracerProvider};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::observability::error::TelemetryError;
use crate::observability::exporter::{self, ExporterSet};
use crate::observability::logs::{LogSink, Logger, DEFAULT_LOG_QUEUE_CAPACITY};
use crate::observability::metrics::{Meter, MetricsRegistry};
use crate::observability::resource::ResourceDescriptor;
use crate::observability::spans::SpanTracker;

/// Instrumentation scope of the process-wide tracer.
const TRACER_NAME: &str = "observe-relay";

/// Lifecycle state of a [`TelemetryProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Uninitialized,
    Running,
    ShuttingDown,
    ShutDown,
}

/// Everything needed to build the exporters.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub resource: ResourceDescriptor,
    pub endpoint: String,
    /// Empty or absent means no `Authorization` header.
    pub token: Option<String>,
    pub metric_export_interval: Duration,
    pub trace_flush_interval: Duration,
    pub max_export_batch_size: usize,
    /// Bound on each export request and on each shutdown step.
    pub export_timeout: Duration,
    /// Log records buffered ahead of the exporter; beyond this they are
    /// dropped and counted.
    pub log_queue_capacity: usize,
}

impl TelemetrySettings {
    pub fn new(resource: ResourceDescriptor, endpoint: impl Into<String>) -> Self {
        Self {
            resource,
            endpoint: endpoint.into(),
            token: None,
            metric_export_interval: Duration::from_millis(10_000),
            trace_flush_interval: Duration::from_millis(5_000),
            max_export_batch_size: 512,
            export_timeout: Duration::from_millis(5_000),
            log_queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
        }
    }
}

/// Handles valid from `initialize()` onwards.
#[derive(Debug)]
struct Handles {
    tracker: SpanTracker,
    registry: MetricsRegistry,
}

/// Providers and the log export task, owned until shutdown.
struct Pipelines {
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    log_task: JoinHandle<()>,
    log_abandoned: Arc<AtomicBool>,
}

pub struct TelemetryProcess {
    settings: TelemetrySettings,
    state: watch::Sender<ProcessState>,
    init_lock: Mutex<()>,
    handles: OnceLock<Handles>,
    pipelines: Mutex<Option<Pipelines>>,
    log_sink: LogSink,
    exporter_sets_built: AtomicUsize,
}

impl std::fmt::Debug for TelemetryProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryProcess")
            .field("service", &self.settings.resource.service_name())
            .field("state", &self.state())
            .finish()
    }
}

impl TelemetryProcess {
    pub fn new(settings: TelemetrySettings) -> Self {
        let (state, _) = watch::channel(ProcessState::Uninitialized);
        Self {
            settings,
            state,
            init_lock: Mutex::new(()),
            handles: OnceLock::new(),
            pipelines: Mutex::new(None),
            log_sink: LogSink::new(),
            exporter_sets_built: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.settings.resource
    }

    /// Number of exporter sets constructed over the process lifetime.
    pub fn exporter_sets_built(&self) -> usize {
        self.exporter_sets_built.load(Ordering::SeqCst)
    }

    /// Sink shared with the log bridge layer. Usable before initialization;
    /// records are discarded until the log exporter is attached.
    pub fn log_sink(&self) -> LogSink {
        self.log_sink.clone()
    }

    /// Build the exporters and start the providers. A no-op while running;
    /// fails once the process has been shut down.
    pub fn initialize(&self) -> Result<(), TelemetryError> {
        let _guard = self.init_lock.lock().expect("telemetry init mutex poisoned");

        match self.state() {
            ProcessState::Running => return Ok(()),
            ProcessState::ShuttingDown | ProcessState::ShutDown => {
                return Err(TelemetryError::ShutDown)
            }
            ProcessState::Uninitialized => {}
        }

        tokio::runtime::Handle::try_current().map_err(|_| {
            TelemetryError::ExporterInit("initialize() must run inside a Tokio runtime".into())
        })?;

        let settings = &self.settings;
        let exporters = ExporterSet::new(
            &settings.endpoint,
            settings.token.clone(),
            settings.export_timeout,
        )?;
        let span_exporter = exporters.span_exporter()?;
        let metric_exporter = exporters.metric_exporter()?;
        let log_exporter = exporters.log_exporter()?;
        self.exporter_sets_built.fetch_add(1, Ordering::SeqCst);

        let resource = settings.resource.to_otel();

        let batch = BatchConfigBuilder::default()
            .with_scheduled_delay(settings.trace_flush_interval)
            .with_max_export_batch_size(settings.max_export_batch_size)
            .with_max_export_timeout(settings.export_timeout)
            .build();
        let tracer_provider = TracerProvider::builder()
            .with_span_processor(
                BatchSpanProcessor::builder(span_exporter, runtime::Tokio)
                    .with_batch_config(batch)
                    .build(),
            )
            .with_resource(resource.clone())
            .build();

        let reader = PeriodicReader::builder(metric_exporter, runtime::Tokio)
            .with_interval(settings.metric_export_interval)
            .with_timeout(settings.export_timeout)
            .build();
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource.clone())
            .build();

        let logger_provider = LoggerProvider::builder()
            .with_simple_exporter(log_exporter)
            .with_resource(resource)
            .build();
        let (log_tx, log_rx) = mpsc::channel(settings.log_queue_capacity.max(1));
        let log_abandoned = Arc::new(AtomicBool::new(false));
        let log_task = tokio::task::spawn_blocking({
            let sink = self.log_sink.clone();
            let abandoned = log_abandoned.clone();
            move || exporter::run_log_exporter(log_rx, logger_provider, sink, abandoned)
        });
        self.log_sink.attach(log_tx);

        // Only reachable once: state leaves Uninitialized below under the same lock.
        let _ = self.handles.set(Handles {
            tracker: SpanTracker::new(tracer_provider.tracer(TRACER_NAME)),
            registry: MetricsRegistry::new(meter_provider.clone()),
        });
        *self.pipelines.lock().expect("telemetry pipelines mutex poisoned") = Some(Pipelines {
            tracer_provider,
            meter_provider,
            log_task,
            log_abandoned,
        });

        self.state.send_replace(ProcessState::Running);

        tracing::info!(
            service = %settings.resource.service_name(),
            version = %settings.resource.service_version(),
            environment = %settings.resource.environment(),
            endpoint = %settings.endpoint,
            authenticated = exporters.authorization().is_some(),
            metric_interval_ms = settings.metric_export_interval.as_millis() as u64,
            log_queue_capacity = settings.log_queue_capacity,
            "Telemetry initialized"
        );
        Ok(())
    }

    pub fn tracker(&self) -> Result<SpanTracker, TelemetryError> {
        self.handles
            .get()
            .map(|h| h.tracker.clone())
            .ok_or(TelemetryError::NotInitialized)
    }

    pub fn meter(&self, name: &str) -> Result<Meter, TelemetryError> {
        self.handles
            .get()
            .map(|h| h.registry.meter(name))
            .ok_or(TelemetryError::NotInitialized)
    }

    pub fn logger(&self, scope: &str) -> Result<Logger, TelemetryError> {
        match self.handles.get() {
            Some(_) => Ok(Logger::new(scope, self.log_sink.clone())),
            None => Err(TelemetryError::NotInitialized),
        }
    }

    /// Flush and stop traces, then metrics, then logs.
    ///
    /// Idempotent. A caller arriving while another shutdown is in progress
    /// waits for it to complete. Never fails: exporter errors and timeouts
    /// are logged and the remaining steps still run.
    pub async fn shutdown(&self) {
        let mut watcher = self.state.subscribe();
        let mut owner = false;
        self.state.send_if_modified(|state| match state {
            ProcessState::Running => {
                *state = ProcessState::ShuttingDown;
                owner = true;
                true
            }
            ProcessState::Uninitialized => {
                *state = ProcessState::ShutDown;
                true
            }
            ProcessState::ShuttingDown | ProcessState::ShutDown => false,
        });

        if !owner {
            let _ = watcher.wait_for(|s| *s == ProcessState::ShutDown).await;
            return;
        }

        let pipelines = self
            .pipelines
            .lock()
            .expect("telemetry pipelines mutex poisoned")
            .take();

        if let Some(p) = pipelines {
            let timeout = self.settings.export_timeout;
            tracing::info!(timeout_ms = timeout.as_millis() as u64, "Telemetry shutdown started");

            let tracer_provider = p.tracer_provider;
            finish(
                "trace processor",
                tokio::task::spawn_blocking(move || {
                    tracer_provider.shutdown().map_err(|e| e.to_string())
                }),
                timeout,
            )
            .await;

            let meter_provider = p.meter_provider;
            finish(
                "metric reader",
                tokio::task::spawn_blocking(move || {
                    meter_provider.shutdown().map_err(|e| e.to_string())
                }),
                timeout,
            )
            .await;

            self.log_sink.detach();
            let (log_task, abandoned) = (p.log_task, p.log_abandoned);
            if !finish("log exporter", async move { log_task.await.map(Ok) }, timeout).await {
                abandoned.store(true, Ordering::Relaxed);
            }

            let dropped = self.log_sink.dropped();
            if dropped > 0 {
                tracing::warn!(dropped, "Log records dropped before export");
            }
        }

        self.state.send_replace(ProcessState::ShutDown);
        tracing::info!("Telemetry shutdown complete");
    }
}

/// Await one blocking shutdown step, abandoning it after `timeout`.
///
/// Returns `false` if the step was abandoned. Blocking-pool work cannot be
/// cancelled; an abandoned step keeps running until its export times out.
async fn finish<F>(name: &'static str, step: F, timeout: Duration) -> bool
where
    F: std::future::Future<Output = Result<Result<(), String>, tokio::task::JoinError>>,
{
    match tokio::time::timeout(timeout, step).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!(pipeline = name, "Pipeline flushed");
            true
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(pipeline = name, error = %e, "Pipeline shutdown reported an error");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(pipeline = name, error = %e, "Pipeline task failed");
            true
        }
        Err(_) => {
            tracing::warn!(
                pipeline = name,
                timeout_ms = timeout.as_millis() as u64,
                "Pipeline flush timed out, buffered telemetry lost"
            );
            false
        }
    }
}

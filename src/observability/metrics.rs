//! Metric instruments on top of the OpenTelemetry SDK meter provider.
//!
//! # Instruments
//! - `Counter`: monotonic sum, increments must be >= 0
//! - `Histogram`: explicit-bucket distribution (SDK default bounds)
//! - `ObservableGauge`: sampled by registered callbacks, once per export cycle
//!
//! # Design Decisions
//! - Aggregation, temporality and export belong to the SDK's periodic reader
//! - Gauges are SDK observable gauges whose callback asks [`GaugeRegistry`]
//!   for a sample; a batch callback covering several gauges runs once when
//!   the first of them is read and its other results wait for their gauge
//! - Gauges are deduplicated by scope and name, callbacks by `Arc` identity

use opentelemetry::metrics::{AsyncInstrument, MeterProvider as _};
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::observability::error::TelemetryError;

/// Data point labels, kept sorted so equal label sets aggregate together.
pub type Tags = BTreeMap<String, String>;

/// Build a tag map from borrowed pairs.
pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn key_values(pairs: &[(&str, &str)]) -> Vec<KeyValue> {
    pairs
        .iter()
        .map(|(k, v)| KeyValue::new(k.to_string(), v.to_string()))
        .collect()
}

/// One gauge sample produced by a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    pub tags: Tags,
}

impl Observation {
    pub fn new(value: f64, pairs: &[(&str, &str)]) -> Self {
        Self {
            value,
            tags: tags(pairs),
        }
    }
}

/// Batch callback signature. Receives an observer limited to the gauges the
/// callback was registered for.
pub type BatchCallback = Arc<dyn Fn(&mut BatchObserver) + Send + Sync>;

struct GaugeEntry {
    id: u64,
    scope: String,
    name: String,
    _instrument: opentelemetry::metrics::ObservableGauge<f64>,
}

struct CallbackEntry {
    id: u64,
    gauges: Vec<u64>,
    callback: BatchCallback,
}

/// Gauge and callback bookkeeping shared with the SDK gauge callbacks.
#[derive(Default)]
pub struct GaugeRegistry {
    gauges: Mutex<Vec<GaugeEntry>>,
    callbacks: Mutex<Vec<CallbackEntry>>,
    /// Results of a batch callback for gauges not yet read this cycle,
    /// keyed by (callback id, gauge id).
    pending: Mutex<HashMap<(u64, u64), BTreeMap<Tags, f64>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for GaugeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeRegistry")
            .field("gauges", &self.gauge_count())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl GaugeRegistry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn gauge_count(&self) -> usize {
        self.gauges.lock().expect("gauge registry mutex poisoned").len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().expect("gauge registry mutex poisoned").len()
    }

    fn find_gauge(&self, scope: &str, name: &str) -> Option<u64> {
        self.gauges
            .lock()
            .expect("gauge registry mutex poisoned")
            .iter()
            .find(|g| g.scope == scope && g.name == name)
            .map(|g| g.id)
    }

    fn register(&self, gauges: Vec<u64>, callback: BatchCallback) -> u64 {
        let mut callbacks = self.callbacks.lock().expect("gauge registry mutex poisoned");
        if let Some(existing) = callbacks.iter().find(|c| Arc::ptr_eq(&c.callback, &callback)) {
            tracing::debug!(id = existing.id, "Callback already registered");
            return existing.id;
        }

        let id = self.next_id();
        callbacks.push(CallbackEntry {
            id,
            gauges,
            callback,
        });
        id
    }

    fn unregister(&self, id: u64) {
        self.callbacks
            .lock()
            .expect("gauge registry mutex poisoned")
            .retain(|c| c.id != id);
        self.pending
            .lock()
            .expect("gauge registry mutex poisoned")
            .retain(|(callback, _), _| *callback != id);
    }

    /// Current points of one gauge, merged over every callback covering it.
    /// Later observations of the same label set win.
    ///
    /// Invoked by the SDK reader once per gauge per collection.
    pub fn sample(&self, gauge: u64) -> Vec<(Tags, f64)> {
        // Callbacks run outside the locks so they may touch the registry.
        let covering: Vec<(u64, Vec<u64>, BatchCallback)> = self
            .callbacks
            .lock()
            .expect("gauge registry mutex poisoned")
            .iter()
            .filter(|c| c.gauges.contains(&gauge))
            .map(|c| (c.id, c.gauges.clone(), c.callback.clone()))
            .collect();

        let mut merged = BTreeMap::new();
        for (id, gauges, callback) in covering {
            let cached = self
                .pending
                .lock()
                .expect("gauge registry mutex poisoned")
                .remove(&(id, gauge));

            let points = match cached {
                Some(points) => points,
                None => {
                    let mut observer = BatchObserver {
                        allowed: gauges.clone(),
                        observations: Vec::new(),
                    };
                    callback(&mut observer);

                    let mut per_gauge: HashMap<u64, BTreeMap<Tags, f64>> =
                        gauges.iter().map(|g| (*g, BTreeMap::new())).collect();
                    for (target, obs_tags, value) in observer.observations {
                        per_gauge.entry(target).or_default().insert(obs_tags, value);
                    }
                    let own = per_gauge.remove(&gauge).unwrap_or_default();

                    let mut pending = self.pending.lock().expect("gauge registry mutex poisoned");
                    for (target, points) in per_gauge {
                        pending.insert((id, target), points);
                    }
                    own
                }
            };
            merged.extend(points);
        }
        merged.into_iter().collect()
    }
}

/// Process-wide instrument factory over one SDK meter provider.
#[derive(Clone)]
pub struct MetricsRegistry {
    provider: SdkMeterProvider,
    gauges: Arc<GaugeRegistry>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("gauges", &self.gauges)
            .finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    pub fn new(provider: SdkMeterProvider) -> Self {
        Self {
            provider,
            gauges: Arc::new(GaugeRegistry::default()),
        }
    }

    /// Instruments created through the returned meter are scoped to `name`.
    pub fn meter(&self, name: impl Into<String>) -> Meter {
        let scope: String = name.into();
        let otel = self
            .provider
            .meter_with_scope(InstrumentationScope::builder(scope.clone()).build());
        Meter {
            scope,
            otel,
            gauges: self.gauges.clone(),
        }
    }

    pub fn gauges(&self) -> &GaugeRegistry {
        &self.gauges
    }

    pub(crate) fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }
}

/// Factory for instruments under one instrumentation scope.
#[derive(Clone)]
pub struct Meter {
    scope: String,
    otel: opentelemetry::metrics::Meter,
    gauges: Arc<GaugeRegistry>,
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter").field("scope", &self.scope).finish()
    }
}

impl Meter {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Creating the same counter twice returns a handle to the same series.
    pub fn counter(&self, name: &str, description: &str) -> Counter {
        let inner = self
            .otel
            .f64_counter(name.to_string())
            .with_description(description.to_string())
            .build();
        Counter {
            name: name.to_string(),
            inner,
        }
    }

    pub fn histogram(&self, name: &str, description: &str) -> Histogram {
        let inner = self
            .otel
            .f64_histogram(name.to_string())
            .with_description(description.to_string())
            .build();
        Histogram {
            name: name.to_string(),
            inner,
        }
    }

    /// Register a gauge sampled by `callback` once per export cycle.
    ///
    /// If the gauge already exists in this meter the existing instrument is
    /// returned and `callback` is discarded, so a repeated registration never
    /// produces duplicate samples.
    pub fn gauge<F>(&self, name: &str, description: &str, callback: F) -> ObservableGauge
    where
        F: Fn() -> Vec<Observation> + Send + Sync + 'static,
    {
        let (gauge, created) = self.get_or_create_gauge(name, description);
        if created {
            let target = gauge.clone();
            let batch: BatchCallback = Arc::new(move |observer: &mut BatchObserver| {
                for obs in callback() {
                    observer.observe_tags(&target, obs.value, obs.tags);
                }
            });
            self.gauges.register(vec![gauge.id], batch);
        } else {
            tracing::debug!(gauge = %name, "Gauge already registered, ignoring callback");
        }
        gauge
    }

    /// Register a gauge with no callback of its own, to be fed by
    /// [`Meter::batch_callback`].
    pub fn observable_gauge(&self, name: &str, description: &str) -> ObservableGauge {
        self.get_or_create_gauge(name, description).0
    }

    fn get_or_create_gauge(&self, name: &str, description: &str) -> (ObservableGauge, bool) {
        // Held across creation so two racing registrations cannot both build.
        let mut gauges = self.gauges.gauges.lock().expect("gauge registry mutex poisoned");
        if let Some(existing) = gauges
            .iter()
            .find(|g| g.scope == self.scope && g.name == name)
        {
            return (
                ObservableGauge {
                    id: existing.id,
                    name: name.to_string(),
                },
                false,
            );
        }

        let id = self.gauges.next_id();
        let registry: Weak<GaugeRegistry> = Arc::downgrade(&self.gauges);
        let instrument = self
            .otel
            .f64_observable_gauge(name.to_string())
            .with_description(description.to_string())
            .with_callback(move |observer: &dyn AsyncInstrument<f64>| {
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                for (point_tags, value) in registry.sample(id) {
                    let attributes: Vec<KeyValue> = point_tags
                        .into_iter()
                        .map(|(k, v)| KeyValue::new(k, v))
                        .collect();
                    observer.observe(value, &attributes);
                }
            })
            .build();

        gauges.push(GaugeEntry {
            id,
            scope: self.scope.clone(),
            name: name.to_string(),
            _instrument: instrument,
        });
        (
            ObservableGauge {
                id,
                name: name.to_string(),
            },
            true,
        )
    }

    /// One callback feeding several gauges. It runs once per cycle no matter
    /// how many gauges it covers. Registering the same `Arc` twice returns
    /// the original registration.
    pub fn batch_callback(
        &self,
        gauges: &[&ObservableGauge],
        callback: BatchCallback,
    ) -> CallbackRegistration {
        let ids = gauges.iter().map(|g| g.id).collect();
        let id = self.gauges.register(ids, callback);
        CallbackRegistration {
            id,
            registry: Arc::downgrade(&self.gauges),
        }
    }

    /// Id of an existing gauge, if one with `name` was registered here.
    pub fn find_gauge(&self, name: &str) -> Option<u64> {
        self.gauges.find_gauge(&self.scope, name)
    }
}

/// Monotonic counter handle.
#[derive(Clone)]
pub struct Counter {
    name: String,
    inner: opentelemetry::metrics::Counter<f64>,
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("name", &self.name).finish()
    }
}

impl Counter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `amount` to the series selected by `tags`. Negative or non-finite
    /// amounts are rejected and leave the total unchanged.
    pub fn add(&self, amount: f64, tags_in: &[(&str, &str)]) -> Result<(), TelemetryError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TelemetryError::Validation {
                instrument: self.name.clone(),
                reason: format!("counter increment must be a finite number >= 0, got {}", amount),
            });
        }
        self.inner.add(amount, &key_values(tags_in));
        Ok(())
    }
}

/// Histogram handle.
#[derive(Clone)]
pub struct Histogram {
    name: String,
    inner: opentelemetry::metrics::Histogram<f64>,
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram").field("name", &self.name).finish()
    }
}

impl Histogram {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, value: f64, tags_in: &[(&str, &str)]) -> Result<(), TelemetryError> {
        if !value.is_finite() {
            return Err(TelemetryError::Validation {
                instrument: self.name.clone(),
                reason: format!("histogram value must be finite, got {}", value),
            });
        }
        self.inner.record(value, &key_values(tags_in));
        Ok(())
    }
}

/// Handle to an asynchronous gauge. Only callbacks can write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableGauge {
    id: u64,
    name: String,
}

impl ObservableGauge {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Passed to callbacks during collection.
pub struct BatchObserver {
    allowed: Vec<u64>,
    observations: Vec<(u64, Tags, f64)>,
}

impl BatchObserver {
    pub fn observe(&mut self, gauge: &ObservableGauge, value: f64, tags_in: &[(&str, &str)]) {
        self.observe_tags(gauge, value, tags(tags_in));
    }

    fn observe_tags(&mut self, gauge: &ObservableGauge, value: f64, tags: Tags) {
        if !self.allowed.contains(&gauge.id) {
            tracing::debug!(gauge = %gauge.name, "Observation for unregistered gauge ignored");
            return;
        }
        if !value.is_finite() {
            tracing::debug!(gauge = %gauge.name, value, "Non-finite observation ignored");
            return;
        }
        self.observations.push((gauge.id, tags, value));
    }
}

/// Identity of a batch callback registration.
#[derive(Debug, Clone)]
pub struct CallbackRegistration {
    id: u64,
    registry: Weak<GaugeRegistry>,
}

impl CallbackRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop invoking the callback.
    pub fn unregister(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> MetricsRegistry {
        MetricsRegistry::new(SdkMeterProvider::builder().build())
    }

    #[test]
    fn test_negative_counter_add_rejected() {
        let meter = registry().meter("observe-relay");
        let counter = meter.counter("lambda_logs_processed_total", "Logs processed");
        counter.add(5.0, &[]).unwrap();
        counter.add(0.0, &[("status", "success")]).unwrap();

        let err = counter.add(-1.0, &[]).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::Validation { ref instrument, .. } if instrument == "lambda_logs_processed_total"
        ));
        assert!(counter.add(f64::NAN, &[]).is_err());
        assert!(counter.add(f64::INFINITY, &[]).is_err());
    }

    #[test]
    fn test_non_finite_histogram_value_rejected() {
        let hist = registry()
            .meter("observe-relay")
            .histogram("http_request_duration_ms", "Duration of HTTP requests");
        hist.record(3.0, &[("route", "/health")]).unwrap();
        assert!(hist.record(f64::INFINITY, &[]).is_err());
        assert!(hist.record(f64::NAN, &[]).is_err());
    }

    #[test]
    fn test_gauge_sampled_only_when_read() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let gauge = registry
            .meter("observe-relay")
            .gauge("demo_random_value", "Random demo value", move || {
                c.fetch_add(1, Ordering::SeqCst);
                vec![Observation::new(42.0, &[("source", "demo")])]
            });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let points = registry.gauges().sample(gauge.id());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(points, vec![(tags(&[("source", "demo")]), 42.0)]);
    }

    #[test]
    fn test_duplicate_gauge_registration_single_sample() {
        let registry = registry();
        let meter = registry.meter("observe-relay");
        let first = meter.gauge("demo_random_value", "", || vec![Observation::new(1.0, &[])]);
        let second = meter.gauge("demo_random_value", "", || vec![Observation::new(2.0, &[])]);

        assert_eq!(first, second);
        assert_eq!(registry.gauges().gauge_count(), 1);
        assert_eq!(registry.gauges().callback_count(), 1);
        assert_eq!(registry.gauges().sample(first.id()), vec![(Tags::new(), 1.0)]);
    }

    #[test]
    fn test_same_gauge_name_in_other_scope_is_distinct() {
        let registry = registry();
        let a = registry.meter("a").observable_gauge("g", "");
        let b = registry.meter("b").observable_gauge("g", "");
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.meter("a").find_gauge("g"), Some(a.id()));
    }

    #[test]
    fn test_batch_callback_runs_once_per_cycle() {
        let registry = registry();
        let meter = registry.meter("observe-relay");
        let cpu = meter.observable_gauge("cpu", "");
        let mem = meter.observable_gauge("mem", "");

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let (cpu2, mem2) = (cpu.clone(), mem.clone());
        let callback: BatchCallback = Arc::new(move |obs: &mut BatchObserver| {
            c.fetch_add(1, Ordering::SeqCst);
            obs.observe(&cpu2, 0.5, &[]);
            obs.observe(&mem2, 128.0, &[]);
            // Last write for a label set wins.
            obs.observe(&mem2, 256.0, &[]);
        });

        let first = meter.batch_callback(&[&cpu, &mem], callback.clone());
        let second = meter.batch_callback(&[&cpu, &mem], callback);
        assert_eq!(first.id(), second.id());

        // One cycle reads each gauge once, in either order.
        assert_eq!(registry.gauges().sample(mem.id()), vec![(Tags::new(), 256.0)]);
        assert_eq!(registry.gauges().sample(cpu.id()), vec![(Tags::new(), 0.5)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.gauges().sample(cpu.id()), vec![(Tags::new(), 0.5)]);
        assert_eq!(registry.gauges().sample(mem.id()), vec![(Tags::new(), 256.0)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        first.unregister();
        assert!(registry.gauges().sample(cpu.id()).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.gauges().callback_count(), 0);
    }

    #[test]
    fn test_observation_outside_registration_ignored() {
        let registry = registry();
        let meter = registry.meter("observe-relay");
        let listed = meter.observable_gauge("listed", "");
        let other = meter.observable_gauge("other", "");
        let (l, o) = (listed.clone(), other.clone());
        meter.batch_callback(
            &[&listed],
            Arc::new(move |obs: &mut BatchObserver| {
                obs.observe(&l, 1.0, &[]);
                obs.observe(&o, 1.0, &[]);
                obs.observe(&l, f64::NAN, &[("bad", "value")]);
            }),
        );

        assert_eq!(registry.gauges().sample(listed.id()), vec![(Tags::new(), 1.0)]);
        assert!(registry.gauges().sample(other.id()).is_empty());
    }
}

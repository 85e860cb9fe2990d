use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    aggregate::{Aggregator, Mean, Value},
    clock::Clock,
    history::{History, Tier},
    registry::Registry,
    Sample, Time,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricClass {
    Meter,
    Gauge,
    Event,
    Counter,
}
impl MetricClass {
    /// In the order the exporter lists them.
    pub const ALL: [MetricClass; 4] = [
        MetricClass::Meter,
        MetricClass::Gauge,
        MetricClass::Event,
        MetricClass::Counter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricClass::Meter => "meter",
            MetricClass::Gauge => "gauge",
            MetricClass::Event => "event",
            MetricClass::Counter => "counter",
        }
    }
    pub fn parse(class: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == class)
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            MetricClass::Meter => 0,
            MetricClass::Gauge => 1,
            MetricClass::Event => 2,
            MetricClass::Counter => 3,
        }
    }
}
impl core::fmt::Display for MetricClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type-erased view of a metric the registry and exporter work with.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn class(&self) -> MetricClass;
    /// Samples of [`History::range`] in their wire form.
    fn export(&self, start: Time, end: Time) -> Vec<(Time, serde_json::Value)>;
    /// The newest sample in its wire form.
    fn last(&self) -> Option<(Time, serde_json::Value)>;
    /// Samples currently held, after downsampling.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-metric tiers and aggregation policy.
pub struct MetricOptions<T> {
    pub tiers: Vec<Tier>,
    pub aggregator: Arc<dyn Aggregator<T>>,
}
impl<T: Value> MetricOptions<T> {
    pub fn new(tiers: Vec<Tier>) -> Self {
        Self {
            tiers,
            aggregator: Arc::new(Mean),
        }
    }
    pub fn aggregator(mut self, aggregator: impl Aggregator<T> + 'static) -> Self {
        self.aggregator = Arc::new(aggregator);
        self
    }
}

/// A named history guarded by its own lock.
pub struct Series<T> {
    name: String,
    class: MetricClass,
    history: Mutex<History<T>>,
    clock: Arc<dyn Clock>,
}
impl<T: Value> Series<T> {
    pub fn new(
        name: String,
        class: MetricClass,
        options: MetricOptions<T>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let history = History::new(options.tiers, options.aggregator);
        Self {
            name,
            class,
            history: Mutex::new(history),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write(&self, value: T) -> Sample<T> {
        let mut history = self.history.lock();
        history.append(value, self.clock.now())
    }
    /// Appends `f(current)` without letting another writer in between.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Sample<T> {
        let mut history = self.history.lock();
        let now = self.clock.now();
        let current = history.value_near(now).value;
        history.append(f(&current), now)
    }

    pub fn value(&self) -> T {
        self.value_near(self.clock.now()).value
    }
    pub fn value_near(&self, time: Time) -> Sample<T> {
        self.history.lock().value_near(time)
    }
    pub fn range(&self, start: Time, end: Time) -> Vec<Sample<T>> {
        self.history.lock().range(start, end)
    }
    pub fn last(&self) -> Option<Sample<T>> {
        self.history.lock().last()
    }
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }
}
impl<T: Value> Metric for Series<T> {
    fn name(&self) -> &str {
        &self.name
    }
    fn class(&self) -> MetricClass {
        self.class
    }
    fn export(&self, start: Time, end: Time) -> Vec<(Time, serde_json::Value)> {
        self.range(start, end)
            .into_iter()
            .map(|sample| (sample.time, sample.value.to_json()))
            .collect()
    }
    fn last(&self) -> Option<(Time, serde_json::Value)> {
        Series::last(self).map(|sample| (sample.time, sample.value.to_json()))
    }
    fn len(&self) -> usize {
        Series::len(self)
    }
}
impl<T: core::fmt::Debug> core::fmt::Debug for Series<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Series")
            .field("name", &self.name)
            .field("class", &self.class)
            .finish()
    }
}

/// Keeps a series registered for as long as it lives.
#[derive(Debug)]
struct Registration<T: Value> {
    series: Arc<Series<T>>,
    registry: Arc<Registry>,
}
impl<T: Value> Registration<T> {
    fn new(
        registry: &Arc<Registry>,
        name: String,
        class: MetricClass,
        options: MetricOptions<T>,
    ) -> Self {
        let series = Arc::new(Series::new(name, class, options, registry.clock()));
        registry.register(series.clone());
        Self {
            series,
            registry: registry.clone(),
        }
    }
}
impl<T: Value> Drop for Registration<T> {
    fn drop(&mut self) {
        self.registry.unregister(self.series.as_ref());
    }
}

#[derive(Debug)]
pub struct Counter {
    inner: Registration<i64>,
}
impl Counter {
    pub fn new(registry: &Arc<Registry>, name: impl Into<String>) -> Self {
        Self::with_options(registry, name, registry.default_options())
    }
    pub fn with_options(
        registry: &Arc<Registry>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Self {
        let inner = Registration::new(registry, name.into(), MetricClass::Counter, options);
        Self { inner }
    }

    pub fn increment(&self, delta: i64) -> Sample<i64> {
        self.inner.series.update(|v| v.saturating_add(delta))
    }
    pub fn series(&self) -> &Series<i64> {
        &self.inner.series
    }
    pub fn name(&self) -> &str {
        self.inner.series.name()
    }
    pub fn value(&self) -> i64 {
        self.inner.series.value()
    }
    /// See [`History::range`].
    pub fn history(&self, start: Time, end: Time) -> Vec<Sample<i64>> {
        self.inner.series.range(start, end)
    }
}

#[derive(Debug)]
pub struct Gauge {
    inner: Registration<i64>,
}
impl Gauge {
    pub fn new(registry: &Arc<Registry>, name: impl Into<String>) -> Self {
        Self::with_options(registry, name, registry.default_options())
    }
    pub fn with_options(
        registry: &Arc<Registry>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Self {
        let inner = Registration::new(registry, name.into(), MetricClass::Gauge, options);
        Self { inner }
    }

    pub fn set(&self, value: i64) -> Sample<i64> {
        self.inner.series.write(value)
    }
    pub fn increment(&self, delta: i64) -> Sample<i64> {
        self.inner.series.update(|v| v.saturating_add(delta))
    }
    pub fn series(&self) -> &Series<i64> {
        &self.inner.series
    }
    pub fn name(&self) -> &str {
        self.inner.series.name()
    }
    pub fn value(&self) -> i64 {
        self.inner.series.value()
    }
    /// See [`History::range`].
    pub fn history(&self, start: Time, end: Time) -> Vec<Sample<i64>> {
        self.inner.series.range(start, end)
    }
}

/// Accumulates a count; rates are left to whoever reads the history.
#[derive(Debug)]
pub struct Meter {
    inner: Registration<i64>,
}
impl Meter {
    pub fn new(registry: &Arc<Registry>, name: impl Into<String>) -> Self {
        Self::with_options(registry, name, registry.default_options())
    }
    pub fn with_options(
        registry: &Arc<Registry>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Self {
        let inner = Registration::new(registry, name.into(), MetricClass::Meter, options);
        Self { inner }
    }

    pub fn increment(&self, delta: i64) -> Sample<i64> {
        self.inner.series.update(|v| v.saturating_add(delta))
    }
    pub fn series(&self) -> &Series<i64> {
        &self.inner.series
    }
    pub fn name(&self) -> &str {
        self.inner.series.name()
    }
    pub fn value(&self) -> i64 {
        self.inner.series.value()
    }
    /// See [`History::range`].
    pub fn history(&self, start: Time, end: Time) -> Vec<Sample<i64>> {
        self.inner.series.range(start, end)
    }
}

/// Records a duration as it happened.
#[derive(Debug)]
pub struct Event {
    inner: Registration<Duration>,
}
impl Event {
    pub fn new(registry: &Arc<Registry>, name: impl Into<String>) -> Self {
        Self::with_options(registry, name, registry.default_options())
    }
    pub fn with_options(
        registry: &Arc<Registry>,
        name: impl Into<String>,
        options: MetricOptions<Duration>,
    ) -> Self {
        let inner = Registration::new(registry, name.into(), MetricClass::Event, options);
        Self { inner }
    }

    pub fn notify(&self, value: Duration) -> Sample<Duration> {
        self.inner.series.write(value)
    }
    pub fn series(&self) -> &Series<Duration> {
        &self.inner.series
    }
    pub fn name(&self) -> &str {
        self.inner.series.name()
    }
    pub fn value(&self) -> Duration {
        self.inner.series.value()
    }
    /// See [`History::range`].
    pub fn history(&self, start: Time, end: Time) -> Vec<Sample<Duration>> {
        self.inner.series.range(start, end)
    }
}

pub type HookHandler = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// The registered half of a [`Hook`].
pub struct HookEntry {
    handler: HookHandler,
}
impl HookEntry {
    pub fn new(handler: HookHandler) -> Self {
        Self { handler }
    }

    pub fn handle(&self) -> anyhow::Result<()> {
        (self.handler)()
    }
}
impl core::fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookEntry").finish_non_exhaustive()
    }
}

/// A callback run before every export.
///
/// The registry owns the handler. A handler that owns a metric handle keeps
/// the registry alive through it, so capture handles with [`std::sync::Weak`]
/// when the registry should be dropped with its handles.
#[derive(Debug)]
pub struct Hook {
    entry: Arc<HookEntry>,
    registry: Arc<Registry>,
}
impl Hook {
    pub fn new<F>(registry: &Arc<Registry>, handler: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let entry = Arc::new(HookEntry::new(Box::new(handler)));
        registry.register_hook(entry.clone());
        Self {
            entry,
            registry: registry.clone(),
        }
    }

    pub fn handle(&self) -> anyhow::Result<()> {
        self.entry.handle()
    }
}
impl Drop for Hook {
    fn drop(&mut self) {
        self.registry.unregister_hook(&self.entry);
    }
}

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    aggregate::Value,
    clock::{Clock, SystemClock},
    history::Tier,
    metric::{
        Counter, Event, Gauge, Hook, HookEntry, Meter, Metric, MetricClass, MetricOptions,
    },
    Time,
};

type MetricList = Mutex<Vec<Arc<dyn Metric>>>;

/// Every live metric and hook, partitioned by class.
///
/// Each class has its own lock; a metric's history has yet another, so
/// readers of one class never wait on writers of another.
pub struct Registry {
    metrics: [MetricList; 4],
    hooks: Mutex<Vec<Arc<HookEntry>>>,
    clock: Arc<dyn Clock>,
    tiers: Vec<Tier>,
}
impl Registry {
    pub fn new(clock: Arc<dyn Clock>, tiers: Vec<Tier>) -> Self {
        Self {
            metrics: core::array::from_fn(|_| Mutex::new(vec![])),
            hooks: Mutex::new(vec![]),
            clock,
            tiers,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
    pub fn now(&self) -> Time {
        self.clock.now()
    }
    pub fn default_options<T: Value>(&self) -> MetricOptions<T> {
        MetricOptions::new(self.tiers.clone())
    }

    pub fn register(&self, metric: Arc<dyn Metric>) {
        tracing::debug!(class = %metric.class(), name = metric.name(), "register");
        self.list_of(metric.class()).lock().push(metric);
    }
    /// Removes `metric` by identity; unknown metrics are ignored.
    pub fn unregister(&self, metric: &dyn Metric) {
        let mut list = self.list_of(metric.class()).lock();
        let target = metric as *const dyn Metric as *const ();
        let pos = list
            .iter()
            .position(|m| Arc::as_ptr(m) as *const () == target);
        if let Some(pos) = pos {
            list.remove(pos);
            tracing::debug!(class = %metric.class(), name = metric.name(), "unregister");
        }
    }

    /// Names in `class`, oldest registration first.
    pub fn list(&self, class: MetricClass) -> Vec<String> {
        let list = self.list_of(class).lock();
        list.iter().map(|m| m.name().to_string()).collect()
    }
    /// The earliest registered metric called `name`.
    pub fn find(&self, class: MetricClass, name: &str) -> Option<Arc<dyn Metric>> {
        let list = self.list_of(class).lock();
        list.iter().find(|m| m.name() == name).cloned()
    }
    pub fn len(&self, class: MetricClass) -> usize {
        self.list_of(class).lock().len()
    }
    pub fn is_empty(&self) -> bool {
        MetricClass::ALL.iter().all(|class| self.len(*class) == 0) && self.hook_count() == 0
    }

    pub fn register_hook(&self, hook: Arc<HookEntry>) {
        self.hooks.lock().push(hook);
    }
    pub fn unregister_hook(&self, hook: &Arc<HookEntry>) {
        let mut hooks = self.hooks.lock();
        if let Some(pos) = hooks.iter().position(|h| Arc::ptr_eq(h, hook)) {
            hooks.remove(pos);
        }
    }
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Runs every hook in registration order.
    ///
    /// A failing or panicking hook is logged and skipped.
    pub fn run_hooks(&self) -> HookReport {
        // Hooks may register metrics of their own; don't hold the lock while they run
        let hooks = self.hooks.lock().clone();
        let mut report = HookReport::default();
        for hook in hooks {
            match catch_unwind(AssertUnwindSafe(|| hook.handle())) {
                Ok(Ok(())) => report.ran += 1,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "hook failed");
                    report.failed += 1;
                }
                Err(_) => {
                    tracing::warn!("hook panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn counter(self: &Arc<Self>, name: impl Into<String>) -> Counter {
        Counter::new(self, name)
    }
    pub fn gauge(self: &Arc<Self>, name: impl Into<String>) -> Gauge {
        Gauge::new(self, name)
    }
    pub fn meter(self: &Arc<Self>, name: impl Into<String>) -> Meter {
        Meter::new(self, name)
    }
    pub fn event(self: &Arc<Self>, name: impl Into<String>) -> Event {
        Event::new(self, name)
    }
    pub fn counter_with(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Counter {
        Counter::with_options(self, name, options)
    }
    pub fn gauge_with(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Gauge {
        Gauge::with_options(self, name, options)
    }
    pub fn meter_with(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: MetricOptions<i64>,
    ) -> Meter {
        Meter::with_options(self, name, options)
    }
    pub fn event_with(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: MetricOptions<Duration>,
    ) -> Event {
        Event::with_options(self, name, options)
    }
    pub fn hook<F>(self: &Arc<Self>, handler: F) -> Hook
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook::new(self, handler)
    }

    fn list_of(&self, class: MetricClass) -> &MetricList {
        &self.metrics[class.index()]
    }
}
impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Tier::default_tiers())
    }
}
impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Registry");
        for class in MetricClass::ALL {
            s.field(class.as_str(), &self.len(class));
        }
        s.field("hooks", &self.hook_count())
            .field("tiers", &self.tiers)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    pub ran: usize,
    pub failed: usize,
}

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::{clock::duration_to_time, metric::MetricClass, registry::Registry, Error, Time};

const MILLIS_PER_SEC: Time = 1_000;

/// The transport's view of one request.
pub trait Session {
    /// Path and query, e.g. `/metric/gauge/temp?start=0`
    fn request_url(&self) -> &str;
    fn write_response(&mut self, status: u16, body: String);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Root,
    Classes,
    /// `None` for a class no metric can belong to.
    Names(Option<MetricClass>),
    History(Option<MetricClass>, String),
    NotFound,
}
impl Route {
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('/').skip(1);
        match segments.next() {
            None | Some("") => Route::Root,
            Some("metric") => {
                let class = match segments.next() {
                    None | Some("") => return Route::Classes,
                    Some(class) => MetricClass::parse(class),
                };
                match segments.next() {
                    None | Some("") => Route::Names(class),
                    Some(name) => Route::History(class, name.to_string()),
                }
            }
            Some(_) => Route::NotFound,
        }
    }
}

/// `start` and `end` of a history query, in the exporter's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Time,
    pub end: Time,
}
impl TimeRange {
    /// Bounds missing from `query` or not understood default to the epoch and
    /// `now`.
    pub fn from_query(query: Option<&str>, now: Time) -> Self {
        let mut range = Self { start: 0, end: now };
        let Some(query) = query else {
            return range;
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let bound = match &*key {
                "start" => &mut range.start,
                "end" => &mut range.end,
                _ => continue,
            };
            match parse_time(&value) {
                Ok(time) => *bound = time,
                Err(e) => tracing::debug!(%key, error = %e, "using default bound"),
            }
        }
        range
    }
}

/// Accepts epoch seconds, RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` and
/// `YYYYMMDDTHHMMSS[.fff]`, all in UTC unless an offset is given.
pub fn parse_time(text: &str) -> Result<Time, Error> {
    let text = text.trim();
    let invalid = || Error::InvalidTime(text.to_string());
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        let secs: Time = text.parse().map_err(|_| invalid())?;
        return secs.checked_mul(MILLIS_PER_SEC).ok_or_else(invalid);
    }
    if let Ok(time) = humantime::parse_rfc3339_weak(text) {
        let since_epoch = time
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| invalid())?;
        return Ok(duration_to_time(since_epoch));
    }
    let millis = if let Ok(time) = chrono::DateTime::parse_from_rfc3339(text) {
        time.timestamp_millis()
    } else {
        let naive = NaiveDateTime::parse_from_str(text, "%Y%m%dT%H%M%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y%m%dT%H%M%S%.f"))
            .map_err(|_| invalid())?;
        Utc.from_utc_datetime(&naive).timestamp_millis()
    };
    Time::try_from(millis).map_err(|_| invalid())
}

/// Answers metric queries from a [`Registry`].
#[derive(Debug, Clone)]
pub struct Exporter {
    registry: Arc<Registry>,
}
impl Exporter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Every request is answered with `200`; not-found outcomes are empty JSON.
    pub fn on_request(&self, session: &mut impl Session) {
        let body = self.query(session.request_url());
        session.write_response(200, body.to_string());
    }

    pub fn query(&self, url: &str) -> Value {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        match Route::parse(path) {
            Route::Classes => {
                let classes: Vec<_> = MetricClass::ALL.iter().map(|c| c.as_str()).collect();
                json!(classes)
            }
            Route::Names(Some(class)) => json!(self.registry.list(class)),
            Route::Names(None) => json!([]),
            Route::History(class, name) => {
                // Hooks write with the clock too; `end` must not predate them
                let report = self.registry.run_hooks();
                if report.failed != 0 {
                    tracing::debug!(?report, "exporting with failed hooks");
                }
                let range = TimeRange::from_query(query, self.registry.now());
                self.history(class, &name, range)
            }
            Route::Root | Route::NotFound => {
                tracing::debug!(path, "no such resource");
                json!({})
            }
        }
    }

    /// Samples of one metric keyed by their age in whole seconds before
    /// `range.end`. Hooks are not run here.
    pub fn history(&self, class: Option<MetricClass>, name: &str, range: TimeRange) -> Value {
        let metric = class.and_then(|class| self.registry.find(class, name));
        let Some(metric) = metric else {
            return json!({});
        };
        let mut body = Map::new();
        // `end` itself is part of the range
        for (time, value) in metric.export(range.start, range.end.saturating_add(1)) {
            let age = range.end.saturating_sub(time) / MILLIS_PER_SEC;
            body.insert(age.to_string(), value);
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        clock::{Clock, ManualClock},
        history::Tier,
    };

    #[derive(Debug, Default)]
    struct FakeSession {
        url: String,
        response: Option<(u16, String)>,
    }
    impl Session for FakeSession {
        fn request_url(&self) -> &str {
            &self.url
        }
        fn write_response(&mut self, status: u16, body: String) {
            self.response = Some((status, body));
        }
    }

    fn exporter() -> (Arc<ManualClock>, Arc<Registry>, Exporter) {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::new(clock.clone(), Tier::default_tiers()));
        let exporter = Exporter::new(registry.clone());
        (clock, registry, exporter)
    }

    #[test]
    fn routes() {
        assert_eq!(Route::parse("/"), Route::Root);
        assert_eq!(Route::parse(""), Route::Root);
        assert_eq!(Route::parse("/metric"), Route::Classes);
        assert_eq!(Route::parse("/metric/"), Route::Classes);
        assert_eq!(
            Route::parse("/metric/gauge"),
            Route::Names(Some(MetricClass::Gauge))
        );
        assert_eq!(
            Route::parse("/metric/gauge/"),
            Route::Names(Some(MetricClass::Gauge))
        );
        assert_eq!(Route::parse("/metric/hook"), Route::Names(None));
        assert_eq!(
            Route::parse("/metric/counter/jobq.job_count"),
            Route::History(Some(MetricClass::Counter), "jobq.job_count".into())
        );
        assert_eq!(Route::parse("/favicon.ico"), Route::NotFound);
    }

    #[test]
    fn time_formats() {
        assert_eq!(parse_time("5").unwrap(), 5_000);
        assert_eq!(parse_time("0").unwrap(), 0);
        assert_eq!(parse_time("1970-01-01T00:01:00Z").unwrap(), 60_000);
        assert_eq!(parse_time("1970-01-01 00:01:00").unwrap(), 60_000);
        assert_eq!(parse_time("1970-01-01 00:01:00.250").unwrap(), 60_250);
        assert_eq!(parse_time("1970-01-01T02:00:00+01:00").unwrap(), 3_600_000);
        assert_eq!(parse_time("19700101T000100").unwrap(), 60_000);
        assert!(parse_time("yesterday").is_err());
        assert!(parse_time("").is_err());
        assert!(parse_time("1969-12-31T23:59:59Z").is_err());
    }

    #[test]
    fn bad_bounds_fall_back_to_defaults() {
        let range = TimeRange::from_query(Some("start=garbage&end=nope"), 9_000);
        assert_eq!(range, TimeRange { start: 0, end: 9_000 });
        let range = TimeRange::from_query(None, 9_000);
        assert_eq!(range, TimeRange { start: 0, end: 9_000 });
        let range = TimeRange::from_query(Some("end=2&start=1&other=x"), 9_000);
        assert_eq!(range, TimeRange { start: 1_000, end: 2_000 });
        let range = TimeRange::from_query(Some("start=1970-01-01+00:00:03"), 9_000);
        assert_eq!(range.start, 3_000);
    }

    #[test]
    fn lists_classes_and_names() {
        let (_clock, registry, exporter) = exporter();
        assert_eq!(
            exporter.query("/metric"),
            json!(["meter", "gauge", "event", "counter"])
        );
        assert_eq!(exporter.query("/metric/meter"), json!([]));
        let _a = registry.meter("a");
        let _b = registry.meter("b");
        assert_eq!(exporter.query("/metric/meter/"), json!(["a", "b"]));
        assert_eq!(exporter.query("/metric/nonsense"), json!([]));
    }

    #[test]
    fn history_is_keyed_by_age() {
        let (clock, registry, exporter) = exporter();
        let gauge = registry.gauge("temp");
        gauge.set(10);
        clock.set(5_000);
        gauge.set(20);
        assert_eq!(
            exporter.query("/metric/gauge/temp?start=0&end=5"),
            json!({"5": "10", "0": "20"})
        );
        // The sample before `start` is reported too
        assert_eq!(
            exporter.query("/metric/gauge/temp?start=3&end=5"),
            json!({"5": "10", "0": "20"})
        );
        assert_eq!(
            exporter.query("/metric/gauge/temp?start=0&end=4"),
            json!({"4": "10"})
        );
    }

    #[test]
    fn history_defaults_to_everything_until_now() {
        let (clock, registry, exporter) = exporter();
        let counter = registry.counter("reqs");
        for _ in 0..3 {
            clock.advance(Duration::from_secs(1));
            counter.increment(1);
        }
        assert_eq!(
            exporter.query("/metric/counter/reqs"),
            json!({"2": "1", "1": "2", "0": "3"})
        );
    }

    #[test]
    fn events_export_milliseconds() {
        let (clock, registry, exporter) = exporter();
        let event = registry.event("ledger.close");
        clock.set(2_000);
        event.notify(Duration::from_millis(350));
        assert_eq!(
            exporter.query("/metric/event/ledger.close"),
            json!({"0": "350"})
        );
    }

    #[test]
    fn unknown_things_are_empty() {
        let (_clock, registry, exporter) = exporter();
        let _g = registry.gauge("temp");
        assert_eq!(exporter.query("/metric/gauge/missing"), json!({}));
        assert_eq!(exporter.query("/metric/hook/temp"), json!({}));
        assert_eq!(exporter.query("/metric/counter/temp"), json!({}));
        assert_eq!(exporter.query("/"), json!({}));
        assert_eq!(exporter.query("/elsewhere"), json!({}));
        // registered but never written
        assert_eq!(exporter.query("/metric/gauge/temp"), json!({}));
    }

    #[test]
    fn hooks_refresh_before_history_queries() {
        let (clock, registry, exporter) = exporter();
        let gauge = Arc::new(registry.gauge("uptime"));
        let _hook = {
            let gauge = gauge.clone();
            let clock = clock.clone();
            registry.hook(move || {
                gauge.set((clock.now() / 1_000) as i64);
                Ok(())
            })
        };
        let _broken = registry.hook(|| anyhow::bail!("unavailable"));
        clock.set(7_000);
        assert_eq!(exporter.query("/metric/gauge"), json!(["uptime"]));
        assert!(gauge.series().is_empty());
        assert_eq!(exporter.query("/metric/gauge/uptime"), json!({"0": "7"}));
    }

    /// Moves forward a millisecond every time it is read.
    #[derive(Debug, Default)]
    struct TickingClock {
        now: std::sync::atomic::AtomicU64,
    }
    impl Clock for TickingClock {
        fn now(&self) -> Time {
            self.now.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
        }
    }

    #[test]
    fn hook_writes_land_inside_their_own_export() {
        let clock = Arc::new(TickingClock::default());
        let registry = Arc::new(Registry::new(clock, Tier::default_tiers()));
        let exporter = Exporter::new(registry.clone());
        let cpu = Arc::new(registry.gauge("cpu"));
        let _hook = {
            let cpu = cpu.clone();
            registry.hook(move || {
                cpu.set(42);
                Ok(())
            })
        };
        assert_eq!(exporter.query("/metric/gauge/cpu"), json!({"0": "42"}));
    }

    #[test]
    fn history_alone_does_not_run_hooks() {
        let (clock, registry, exporter) = exporter();
        let gauge = Arc::new(registry.gauge("g"));
        let _hook = {
            let gauge = gauge.clone();
            registry.hook(move || {
                gauge.set(1);
                Ok(())
            })
        };
        clock.set(1_000);
        let range = TimeRange { start: 0, end: 1_000 };
        assert_eq!(exporter.history(Some(MetricClass::Gauge), "g", range), json!({}));
    }

    #[test]
    fn session_always_gets_200() {
        let (_clock, _registry, exporter) = exporter();
        let mut session = FakeSession {
            url: "/metric/meter/none".into(),
            ..Default::default()
        };
        exporter.on_request(&mut session);
        assert_eq!(session.response, Some((200, "{}".to_string())));

        session.url = "/metric".into();
        exporter.on_request(&mut session);
        assert_eq!(
            session.response,
            Some((200, r#"["meter","gauge","event","counter"]"#.to_string()))
        );
    }
}

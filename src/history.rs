use std::{
    collections::BTreeMap,
    ops::Bound::{Excluded, Included},
    sync::Arc,
    time::Duration,
};

use crate::{
    aggregate::{Aggregator, Mean, Value},
    clock::duration_to_time,
    Error, Sample, Time,
};

/// One resolution level of a history: samples older than `width * retention`
/// are folded into `width`-wide buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tier {
    width: Duration,
    retention: u32,
}
impl Tier {
    pub fn new(width: Duration, retention: u32) -> Result<Self, Error> {
        if duration_to_time(width) == 0 || retention == 0 {
            return Err(Error::InvalidTier { width, retention });
        }
        Ok(Self { width, retention })
    }

    /// `1s x 10`, `1min x 60`, `1h x 24`
    pub fn default_tiers() -> Vec<Tier> {
        vec![
            Tier {
                width: Duration::from_secs(1),
                retention: 10,
            },
            Tier {
                width: Duration::from_secs(60),
                retention: 60,
            },
            Tier {
                width: Duration::from_secs(60 * 60),
                retention: 24,
            },
        ]
    }

    pub fn width(&self) -> Duration {
        self.width
    }
    pub fn retention(&self) -> u32 {
        self.retention
    }

    fn width_ms(&self) -> Time {
        duration_to_time(self.width)
    }
    fn horizon_ms(&self) -> Time {
        self.width_ms().saturating_mul(Time::from(self.retention))
    }

    /// The window `(aggregation_start, cutoff]` this tier compacts at `now`.
    ///
    /// `None` until the history is old enough to have such a window.
    fn window(&self, now: Time) -> Option<(Time, Time)> {
        let cutoff = now.checked_sub(self.horizon_ms())?;
        let aggregation_start = cutoff.checked_sub(self.width_ms())?;
        Some((aggregation_start, cutoff))
    }
}

/// Time-ordered samples of one metric, kept bounded by progressive
/// downsampling through its tiers.
pub struct History<T> {
    samples: BTreeMap<Time, T>,
    tiers: Vec<Tier>,
    aggregator: Arc<dyn Aggregator<T>>,
}
impl<T: Value> History<T> {
    pub fn new(mut tiers: Vec<Tier>, aggregator: Arc<dyn Aggregator<T>>) -> Self {
        tiers.sort_by_key(|tier| tier.width);
        Self {
            samples: BTreeMap::new(),
            tiers,
            aggregator,
        }
    }

    pub fn append(&mut self, value: T, now: Time) -> Sample<T> {
        self.samples.insert(now, value.clone());
        self.downsample(now);
        Sample::new(now, value)
    }

    /// The sample current at `time`, or the zero sample.
    pub fn value_near(&self, time: Time) -> Sample<T> {
        self.samples
            .range(..=time)
            .next_back()
            .map(|(time, value)| Sample::new(*time, value.clone()))
            .unwrap_or_default()
    }

    /// The sample current at `start` followed by every sample in `(start, end)`.
    ///
    /// An empty or inverted range still yields the sample current at `start`.
    pub fn range(&self, start: Time, end: Time) -> Vec<Sample<T>> {
        let predecessor = self.samples.range(..=start).next_back();
        let inner = (start < end)
            .then(|| self.samples.range((Excluded(start), Excluded(end))))
            .into_iter()
            .flatten();
        predecessor
            .into_iter()
            .chain(inner)
            .map(|(time, value)| Sample::new(*time, value.clone()))
            .collect()
    }

    /// The newest sample, if any.
    pub fn last(&self) -> Option<Sample<T>> {
        self.samples
            .last_key_value()
            .map(|(time, value)| Sample::new(*time, value.clone()))
    }

    pub fn downsample(&mut self, now: Time) {
        for tier in &self.tiers {
            fold_window(&mut self.samples, self.aggregator.as_ref(), tier, now);
        }
        let Some(coarsest) = self.tiers.last() else {
            return;
        };
        let Some((horizon, _)) = coarsest.window(now) else {
            return;
        };
        let expired = self
            .samples
            .first_key_value()
            .is_some_and(|(time, _)| *time <= horizon);
        if expired {
            self.samples = self.samples.split_off(&(horizon + 1));
        }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = Sample<T>> + '_ {
        self.samples
            .iter()
            .map(|(time, value)| Sample::new(*time, value.clone()))
    }
}
impl<T: Value> Default for History<T> {
    fn default() -> Self {
        Self::new(Tier::default_tiers(), Arc::new(Mean))
    }
}
impl<T: core::fmt::Debug> core::fmt::Debug for History<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("History")
            .field("samples", &self.samples.len())
            .field("tiers", &self.tiers)
            .finish()
    }
}

fn fold_window<T: Value>(
    samples: &mut BTreeMap<Time, T>,
    aggregator: &dyn Aggregator<T>,
    tier: &Tier,
    now: Time,
) {
    let Some((aggregation_start, cutoff)) = tier.window(now) else {
        return;
    };

    // Measure the window on real sample boundaries
    let Some(snapped_cutoff) = samples.range(..=cutoff).next_back().map(|(t, _)| *t) else {
        return;
    };
    let snapped_start = samples
        .range(..=aggregation_start)
        .next_back()
        .or_else(|| samples.first_key_value())
        .map(|(t, _)| *t)
        .unwrap_or(snapped_cutoff);
    let width = i128::from(tier.width_ms());
    let delta = (i128::from(snapped_cutoff) - i128::from(snapped_start)) - width;
    if delta <= -width {
        return;
    }

    let window: Vec<Time> = samples
        .range((Excluded(aggregation_start), Included(cutoff)))
        .map(|(time, _)| *time)
        .collect();
    let [first, rest @ ..] = window.as_slice() else {
        return;
    };
    if rest.is_empty() {
        return;
    }
    let Some(mut merged) = samples.get(first).cloned() else {
        return;
    };
    for time in rest {
        if let Some(value) = samples.remove(time) {
            merged = aggregator.aggregate(&merged, &value);
        }
    }
    tracing::trace!(
        samples = window.len(),
        at = *first,
        width = ?tier.width,
        "folded window"
    );
    samples.insert(*first, merged);
}

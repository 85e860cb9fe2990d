use std::time::Duration;

/// A value that can be stored in a [`crate::history::History`].
pub trait Value: core::fmt::Debug + Clone + Default + Send + Sync + 'static {
    fn mean(a: &Self, b: &Self) -> Self;
    /// Wire form used by the exporter.
    fn to_json(&self) -> serde_json::Value;
}
impl Value for i64 {
    fn mean(a: &Self, b: &Self) -> Self {
        let sum = i128::from(*a) + i128::from(*b);
        // The mean of two `i64`s always fits in an `i64`
        (sum / 2) as i64
    }
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::String(self.to_string())
    }
}
impl Value for Duration {
    fn mean(a: &Self, b: &Self) -> Self {
        a.saturating_add(*b) / 2
    }
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::String(self.as_millis().to_string())
    }
}

/// Combines two samples of the same metric into one.
pub trait Aggregator<T>: Send + Sync {
    /// `older` precedes `newer` in time.
    fn aggregate(&self, older: &T, newer: &T) -> T;
}
impl<T, F> Aggregator<T> for F
where
    F: Fn(&T, &T) -> T + Send + Sync,
{
    fn aggregate(&self, older: &T, newer: &T) -> T {
        self(older, newer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;
impl<T: Value> Aggregator<T> for Mean {
    fn aggregate(&self, older: &T, newer: &T) -> T {
        T::mean(older, newer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Latest;
impl<T: Clone> Aggregator<T> for Latest {
    fn aggregate(&self, _older: &T, newer: &T) -> T {
        newer.clone()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Max;
impl<T: Clone + Ord> Aggregator<T> for Max {
    fn aggregate(&self, older: &T, newer: &T) -> T {
        core::cmp::max(older, newer).clone()
    }
}

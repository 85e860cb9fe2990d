pub mod aggregate;
pub mod clock;
pub mod config;
pub mod error;
pub mod exporter;
pub mod history;
pub mod metric;
pub mod registry;
pub mod server;

pub use error::Error;

/// Milliseconds since the UNIX epoch.
pub type Time = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample<T> {
    pub time: Time,
    pub value: T,
}
impl<T> Sample<T> {
    pub fn new(time: Time, value: T) -> Self {
        Self { time, value }
    }
}

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tier must have a non-zero width and retention, got {width:?} x {retention}")]
    InvalidTier { width: Duration, retention: u32 },
    #[error("invalid tier `{0}`, expected `<duration>:<count>`")]
    InvalidTierSyntax(String),
    #[error("unrecognized time `{0}`")]
    InvalidTime(String),
}

use std::{net::SocketAddr, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{history::Tier, Error};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Where the exporter listens.
    pub listen: SocketAddr,
    /// Default tiers of every metric that doesn't bring its own.
    pub tiers: Vec<TierConfig>,
}
impl CollectorConfig {
    pub fn tiers(&self) -> Result<Vec<Tier>, Error> {
        self.tiers.iter().map(TierConfig::tier).collect()
    }
}
impl Default for CollectorConfig {
    fn default() -> Self {
        let tiers = Tier::default_tiers()
            .into_iter()
            .map(|tier| TierConfig {
                width: tier.width(),
                retention: tier.retention(),
            })
            .collect();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5001)),
            tiers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(with = "humantime_serde")]
    pub width: Duration,
    pub retention: u32,
}
impl TierConfig {
    pub fn tier(&self) -> Result<Tier, Error> {
        Tier::new(self.width, self.retention)
    }
}
/// `<duration>:<count>`, e.g. `1min:60`
impl FromStr for TierConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidTierSyntax(s.to_string());
        let (width, retention) = s.split_once(':').ok_or_else(invalid)?;
        let width = humantime::parse_duration(width.trim()).map_err(|_| invalid())?;
        let retention = retention.trim().parse().map_err(|_| invalid())?;
        let tier = Self { width, retention };
        tier.tier()?;
        Ok(tier)
    }
}

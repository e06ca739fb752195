//! Revenue Split Calculator
//!
//! Creator/platform shares for a token amount. Only the creator share is
//! computed; the platform share is always the remainder, so the two halves
//! sum to the amount by construction.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::classifier::SourceCategory;
use super::DomainError;

const BPS_SCALE: i64 = 10_000;

/// Result of splitting one amount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub creator: i64,
    pub platform: i64,
}

impl Split {
    pub fn total(&self) -> i64 {
        self.creator + self.platform
    }
}

/// Creator ratio held as integer basis points (0..=10000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreatorRatio(u32);

impl CreatorRatio {
    /// Convert a decimal ratio in [0, 1] with at most 4 decimal places.
    pub fn from_decimal(category: SourceCategory, ratio: Decimal) -> Result<Self, DomainError> {
        if ratio < Decimal::ZERO || ratio > Decimal::ONE {
            return Err(DomainError::invalid_ratio(
                category.as_str(),
                format!("{} is outside [0, 1]", ratio),
            ));
        }

        let bps = ratio * Decimal::from(BPS_SCALE);
        if bps.fract() != Decimal::ZERO {
            return Err(DomainError::invalid_ratio(
                category.as_str(),
                format!("{} has more than 4 decimal places", ratio),
            ));
        }

        bps.to_u32()
            .map(Self)
            .ok_or_else(|| DomainError::invalid_ratio(category.as_str(), "not representable"))
    }

    pub fn from_bps(bps: u32) -> Option<Self> {
        (bps as i64 <= BPS_SCALE).then_some(Self(bps))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }
}

/// Split `amount` with a creator ratio.
///
/// `creator = floor(amount * ratio)`, `platform = amount - creator`.
pub fn split_amount(amount: i64, ratio: CreatorRatio) -> Result<Split, DomainError> {
    if amount < 0 {
        return Err(DomainError::InvalidAmount(amount));
    }

    // amount >= 0 so integer division is a floor; result <= amount fits in i64
    let creator = (amount as i128 * ratio.0 as i128 / BPS_SCALE as i128) as i64;
    Ok(Split {
        creator,
        platform: amount - creator,
    })
}

/// Versioned creator ratios per source category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SplitTableConfig", into = "SplitTableConfig")]
pub struct SplitTable {
    version: String,
    ratios: BTreeMap<SourceCategory, CreatorRatio>,
}

/// On-disk form of a split table, ratios as decimals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitTableConfig {
    pub version: String,
    pub creator_ratios: BTreeMap<SourceCategory, Decimal>,
}

impl SplitTable {
    /// Build a table; every category must have a valid ratio.
    pub fn new(
        version: impl Into<String>,
        ratios: impl IntoIterator<Item = (SourceCategory, Decimal)>,
    ) -> Result<Self, DomainError> {
        let version = version.into();
        let mut table = BTreeMap::new();
        for (category, ratio) in ratios {
            table.insert(category, CreatorRatio::from_decimal(category, ratio)?);
        }

        if let Some(missing) = SourceCategory::ALL.iter().find(|c| !table.contains_key(c)) {
            return Err(DomainError::MissingSplitRatio {
                version,
                category: missing.as_str().to_string(),
            });
        }

        Ok(Self {
            version,
            ratios: table,
        })
    }

    /// Built-in table `v1`: chat 65/35, calls, calendar and events 80/20, other 65/35
    pub fn v1() -> Self {
        Self {
            version: "v1".to_string(),
            ratios: BTreeMap::from([
                (SourceCategory::Chat, CreatorRatio(6500)),
                (SourceCategory::Call, CreatorRatio(8000)),
                (SourceCategory::Calendar, CreatorRatio(8000)),
                (SourceCategory::Event, CreatorRatio(8000)),
                (SourceCategory::Other, CreatorRatio(6500)),
            ]),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn ratio(&self, category: SourceCategory) -> CreatorRatio {
        // Construction guarantees every category is present
        self.ratios
            .get(&category)
            .copied()
            .unwrap_or(CreatorRatio(0))
    }

    /// Split an amount for a source category
    pub fn split(&self, amount: i64, category: SourceCategory) -> Result<Split, DomainError> {
        split_amount(amount, self.ratio(category))
    }
}

impl Default for SplitTable {
    fn default() -> Self {
        Self::v1()
    }
}

impl TryFrom<SplitTableConfig> for SplitTable {
    type Error = DomainError;

    fn try_from(config: SplitTableConfig) -> Result<Self, Self::Error> {
        SplitTable::new(config.version, config.creator_ratios)
    }
}

impl From<SplitTable> for SplitTableConfig {
    fn from(table: SplitTable) -> Self {
        Self {
            version: table.version,
            creator_ratios: table
                .ratios
                .into_iter()
                .map(|(category, ratio)| (category, ratio.as_decimal()))
                .collect(),
        }
    }
}

//! Named daily periods and the hour tables that map onto them.

use core::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use healthcast_core::{DomainError, DomainResult};

/// A named part of the day.
///
/// Variant order is the display order, so `Ord` sorts rows the way they are
/// shown to users and breaks ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "Early Morning")]
    EarlyMorning,
    #[serde(rename = "Morning")]
    Morning,
    #[serde(rename = "Noon")]
    Noon,
    #[serde(rename = "Afternoon")]
    Afternoon,
    #[serde(rename = "Evening")]
    Evening,
    #[serde(rename = "Night")]
    Night,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::EarlyMorning,
        Period::Morning,
        Period::Noon,
        Period::Afternoon,
        Period::Evening,
        Period::Night,
    ];

    /// 1-based position used when listing a day's periods.
    pub fn display_order(self) -> u8 {
        match self {
            Period::EarlyMorning => 1,
            Period::Morning => 2,
            Period::Noon => 3,
            Period::Afternoon => 4,
            Period::Evening => 5,
            Period::Night => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Period::EarlyMorning => "Early Morning",
            Period::Morning => "Morning",
            Period::Noon => "Noon",
            Period::Afternoon => "Afternoon",
            Period::Evening => "Evening",
            Period::Night => "Night",
        }
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Period {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown period: {s}")))
    }
}

/// Collapse an hour to the start of its 3-hour window (0, 3, ..., 21).
pub fn window_start(hour: u32) -> u32 {
    (hour / 3) * 3
}

/// Hour-of-day to period lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodTable {
    slots: [Option<Period>; 24],
}

impl PeriodTable {
    /// Representative hours of 3-hourly forecasts.
    ///
    /// Only the window starts are mapped; every other hour has no period.
    pub fn three_hour_windows() -> Self {
        Self::fill(&[
            (0, 0, Period::EarlyMorning),
            (3, 3, Period::EarlyMorning),
            (6, 6, Period::Morning),
            (9, 9, Period::Morning),
            (12, 12, Period::Noon),
            (15, 15, Period::Afternoon),
            (18, 18, Period::Afternoon),
            (21, 21, Period::Evening),
        ])
    }

    /// Continuous inclusive hour ranges used for hourly UV data.
    ///
    /// These bounds cover the whole day, so `Night` is never produced. Use
    /// [`PeriodTable::from_ranges`] for a table that maps it.
    pub fn hour_ranges() -> Self {
        Self::fill(&[
            (0, 5, Period::EarlyMorning),
            (6, 9, Period::Morning),
            (10, 12, Period::Noon),
            (13, 18, Period::Afternoon),
            (19, 23, Period::Evening),
        ])
    }

    /// Build a custom table from inclusive `(start, end, period)` ranges.
    pub fn from_ranges(ranges: &[(u32, u32, Period)]) -> DomainResult<Self> {
        let mut slots = [None; 24];
        for &(start, end, period) in ranges {
            if start > end || end > 23 {
                return Err(DomainError::validation(format!(
                    "invalid hour range {start}..={end} for {period}"
                )));
            }
            for hour in start..=end {
                let slot = &mut slots[hour as usize];
                if let Some(existing) = slot {
                    return Err(DomainError::validation(format!(
                        "hour {hour} mapped to both {existing} and {period}"
                    )));
                }
                *slot = Some(period);
            }
        }
        Ok(Self { slots })
    }

    fn fill(ranges: &[(u32, u32, Period)]) -> Self {
        let mut slots = [None; 24];
        for &(start, end, period) in ranges {
            for hour in start..=end {
                slots[hour as usize] = Some(period);
            }
        }
        Self { slots }
    }

    pub fn period_for(&self, hour: u32) -> Option<Period> {
        self.slots.get(hour as usize).copied().flatten()
    }

    /// Periods this table can produce.
    pub fn reachable(&self) -> BTreeSet<Period> {
        self.slots.iter().flatten().copied().collect()
    }
}

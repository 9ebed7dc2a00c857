//! Recurrence generation
//!
//! `recurring` maps a start date and a periodicity to an infinite sequence
//! of successive period start dates. The sequence is stateless: recomputing
//! it from the same start always yields the same dates. Month and year
//! arithmetic is anchored at the start date, so a subscription starting on
//! the 31st keeps billing on the last day of shorter months without
//! drifting.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{SubscriptionError, SubscriptionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Periodicity {
    Yearly,
    Monthly,
    Weekly,
    /// Periods are created by hand; the recurrence generator refuses this.
    Manually,
}

impl Periodicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Periodicity::Yearly => "yearly",
            Periodicity::Monthly => "monthly",
            Periodicity::Weekly => "weekly",
            Periodicity::Manually => "manually",
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Periodicity {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yearly" => Ok(Periodicity::Yearly),
            "monthly" => Ok(Periodicity::Monthly),
            "weekly" => Ok(Periodicity::Weekly),
            "manually" => Ok(Periodicity::Manually),
            other => Err(SubscriptionError::InvalidPeriodicity(other.to_string())),
        }
    }
}

/// Infinite iterator over period start dates. Obtained via [`recurring`].
#[derive(Debug, Clone)]
pub struct Recurrence {
    anchor: NaiveDate,
    periodicity: Periodicity,
    step: u32,
}

impl Iterator for Recurrence {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let date = match self.periodicity {
            Periodicity::Yearly => self.anchor.checked_add_months(Months::new(12 * self.step)),
            Periodicity::Monthly => self.anchor.checked_add_months(Months::new(self.step)),
            Periodicity::Weekly => self.anchor.checked_add_days(Days::new(7 * u64::from(self.step))),
            // recurring() never constructs this variant
            Periodicity::Manually => None,
        };
        self.step += 1;
        date
    }
}

/// Build the recurrence sequence starting at `start`.
///
/// `Manually` is not a valid automatic periodicity and fails with
/// [`SubscriptionError::UnknownPeriodicity`].
pub fn recurring(start: NaiveDate, periodicity: Periodicity) -> SubscriptionResult<Recurrence> {
    if periodicity == Periodicity::Manually {
        return Err(SubscriptionError::UnknownPeriodicity(periodicity));
    }
    Ok(Recurrence {
        anchor: start,
        periodicity,
        step: 0,
    })
}

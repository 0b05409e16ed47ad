//! Structured recurrence configuration.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RecurrenceError;

/// How often a series repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// The RRULE `FREQ` token.
    pub fn token(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Frequency {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            other => Err(RecurrenceError::InvalidRule(format!(
                "unsupported frequency '{other}'"
            ))),
        }
    }
}

/// When a series stops producing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum EndCondition {
    #[default]
    Never,
    /// Last day (inclusive) on which an occurrence may fall.
    Until(NaiveDate),
    /// Total number of occurrences, counted from the anchor.
    AfterCount(u32),
}

impl EndCondition {
    pub fn is_bounded(&self) -> bool {
        !matches!(self, EndCondition::Never)
    }
}

/// The shape of a recurring series, independent of its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecurrenceOptions {
    pub frequency: Frequency,
    pub interval: u16,
    pub end: EndCondition,
}

impl Default for RecurrenceOptions {
    fn default() -> Self {
        Self {
            frequency: Frequency::Weekly,
            interval: 1,
            end: EndCondition::Never,
        }
    }
}

impl RecurrenceOptions {
    pub fn new(frequency: Frequency, interval: u16, end: EndCondition) -> Self {
        Self {
            frequency,
            interval,
            end,
        }
    }

    /// Check the invariants that do not depend on an anchor.
    ///
    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidOptions`] if the interval or the
    /// repetition count is zero.
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        if self.interval < 1 {
            return Err(RecurrenceError::InvalidOptions(
                "interval must be at least 1".to_string(),
            ));
        }
        if let EndCondition::AfterCount(0) = self.end {
            return Err(RecurrenceError::InvalidOptions(
                "count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), additionally rejecting an `Until`
    /// date strictly before `anchor_date`.
    ///
    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidOptions`] on any violated invariant.
    pub fn validate_for_anchor(&self, anchor_date: NaiveDate) -> Result<(), RecurrenceError> {
        self.validate()?;
        if let EndCondition::Until(until) = self.end {
            if until < anchor_date {
                return Err(RecurrenceError::InvalidOptions(format!(
                    "until date {until} is before the series start {anchor_date}"
                )));
            }
        }
        Ok(())
    }
}

//! Conversion between rule strings and structured recurrence options.
//!
//! A rule string carries its anchor on a `DTSTART` line followed by an
//! RFC 5545 `RRULE` subset:
//!
//! ```text
//! DTSTART:20240101T100000Z
//! RRULE:FREQ=WEEKLY;INTERVAL=1;COUNT=5
//! ```
//!
//! Only `FREQ` (`DAILY`, `WEEKLY`, `MONTHLY`), `INTERVAL`, and one of `UNTIL`
//! or `COUNT` are understood. `WKST` is tolerated and ignored; anything else
//! is rejected so that the occurrence set never depends on parts this engine
//! does not model.
//!
//! # Functions
//!
//! - [`decode`] — rule string → anchor + [`RecurrenceOptions`]
//! - [`encode`] — anchor date/time + options → rule string
//! - [`rebind`] — swap the options of an existing rule, keeping its anchor
//! - [`truncate`] — end an existing rule at an exact cutoff instant

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{RecurrenceError, Result};
use crate::options::{EndCondition, Frequency, RecurrenceOptions};

const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const FLOATING_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

/// How a parsed rule ends, keeping the exact `UNTIL` instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleEnd {
    Never,
    Until(DateTime<Utc>),
    Count(u32),
}

/// A fully parsed rule string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RuleParts {
    pub anchor: DateTime<Utc>,
    pub frequency: Frequency,
    pub interval: u16,
    pub end: RuleEnd,
}

impl RuleParts {
    fn from_options(anchor: DateTime<Utc>, options: &RecurrenceOptions) -> Self {
        let end = match options.end {
            EndCondition::Never => RuleEnd::Never,
            EndCondition::Until(date) => RuleEnd::Until(end_of_day(date)),
            EndCondition::AfterCount(count) => RuleEnd::Count(count),
        };
        Self {
            anchor,
            frequency: options.frequency,
            interval: options.interval,
            end,
        }
    }

    pub fn options(&self) -> RecurrenceOptions {
        let end = match self.end {
            RuleEnd::Never => EndCondition::Never,
            RuleEnd::Until(cutoff) => EndCondition::Until(last_covered_date(self.anchor, cutoff)),
            RuleEnd::Count(count) => EndCondition::AfterCount(count),
        };
        RecurrenceOptions::new(self.frequency, self.interval, end)
    }

    /// Canonical serialization. Every string the engine stores comes from here.
    pub fn render(&self) -> String {
        let end = match self.end {
            RuleEnd::Never => String::new(),
            RuleEnd::Until(cutoff) => format!(";UNTIL={}", cutoff.format(DATETIME_FORMAT)),
            RuleEnd::Count(count) => format!(";COUNT={count}"),
        };
        format!(
            "DTSTART:{}\nRRULE:FREQ={};INTERVAL={}{}",
            self.anchor.format(DATETIME_FORMAT),
            self.frequency.token(),
            self.interval,
            end
        )
    }
}

/// Decode a rule string into its anchor instant and structured options.
///
/// An exact `UNTIL` instant decodes to [`EndCondition::Until`] of the last
/// date whose occurrence falls at or before it. Every occurrence is at the
/// anchor's time of day, so when the cutoff's time of day is earlier than the
/// anchor's, the cutoff date itself is excluded. Re-encoding the decoded
/// options then yields the same occurrence set.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the string is empty, has no
/// `DTSTART` anchor, uses an unsupported frequency or rule part, or has an end
/// condition that is neither an absolute cutoff nor a positive count.
///
/// # Examples
///
/// ```
/// use lesson_recurrence::codec::decode;
/// use lesson_recurrence::{EndCondition, Frequency};
///
/// let (anchor, options) =
///     decode("DTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;INTERVAL=1;COUNT=5").unwrap();
/// assert_eq!(anchor.to_rfc3339(), "2024-01-01T10:00:00+00:00");
/// assert_eq!(options.frequency, Frequency::Weekly);
/// assert_eq!(options.end, EndCondition::AfterCount(5));
/// ```
pub fn decode(rule: &str) -> Result<(DateTime<Utc>, RecurrenceOptions)> {
    let parts = parse(rule)?;
    Ok((parts.anchor, parts.options()))
}

/// Encode a recurrence for a lesson starting at `anchor_date` + `anchor_time`.
///
/// Returns `Ok(None)` when the lesson is not being made recurring, or when
/// either half of the anchor is still missing (the form is incomplete).
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidOptions`] if the interval or count is
/// zero, or if an `Until` date falls before `anchor_date`.
pub fn encode(
    anchor_date: Option<NaiveDate>,
    anchor_time: Option<NaiveTime>,
    options: &RecurrenceOptions,
    recurring: bool,
) -> Result<Option<String>> {
    if !recurring {
        return Ok(None);
    }
    let (Some(date), Some(time)) = (anchor_date, anchor_time) else {
        return Ok(None);
    };
    encode_at(date.and_time(time).and_utc(), options).map(Some)
}

/// Encode a recurrence anchored at an already combined instant.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_at(anchor: DateTime<Utc>, options: &RecurrenceOptions) -> Result<String> {
    options.validate_for_anchor(anchor.date_naive())?;
    Ok(RuleParts::from_options(anchor, options).render())
}

/// Replace frequency, interval and end condition of `existing`, keeping its
/// anchor so that editing the shape never moves the series start.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if `existing` cannot be decoded,
/// or [`RecurrenceError::InvalidOptions`] if `options` are invalid for the
/// existing anchor.
pub fn rebind(existing: &str, options: &RecurrenceOptions) -> Result<String> {
    let parts = parse(existing)?;
    encode_at(parts.anchor, options)
}

/// End `rule` at `cutoff` (inclusive), keeping anchor, frequency and interval.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if `rule` cannot be decoded, or
/// [`RecurrenceError::InvalidOptions`] if `cutoff` precedes the anchor.
pub fn truncate(rule: &str, cutoff: DateTime<Utc>) -> Result<String> {
    let parts = parse(rule)?;
    if cutoff < parts.anchor {
        return Err(RecurrenceError::InvalidOptions(format!(
            "cutoff {cutoff} is before the series start {}",
            parts.anchor
        )));
    }
    Ok(RuleParts {
        end: RuleEnd::Until(cutoff),
        ..parts
    }
    .render())
}

// ── Parsing ─────────────────────────────────────────────────────────────────

pub(crate) fn parse(rule: &str) -> Result<RuleParts> {
    let rule = rule.trim();
    if rule.is_empty() {
        return Err(invalid("empty rule"));
    }

    let mut anchor = None;
    let mut body = None;
    for line in rule.split_whitespace() {
        let upper = line.to_ascii_uppercase();
        if let Some(value) = upper.strip_prefix("DTSTART:") {
            if anchor.replace(parse_instant(value)?).is_some() {
                return Err(invalid("duplicate DTSTART"));
            }
        } else if let Some(value) = upper.strip_prefix("RRULE:") {
            if body.replace(value.to_string()).is_some() {
                return Err(invalid("multiple RRULE lines"));
            }
        } else if upper.starts_with("FREQ=") || upper.contains(";FREQ=") {
            if body.replace(upper.clone()).is_some() {
                return Err(invalid("multiple RRULE lines"));
            }
        } else {
            return Err(invalid(&format!("unexpected line '{line}'")));
        }
    }

    let anchor = anchor.ok_or_else(|| invalid("missing DTSTART anchor"))?;
    let body = body.ok_or_else(|| invalid("missing RRULE"))?;

    let mut frequency = None;
    let mut interval = None;
    let mut until = None;
    let mut count = None;

    for part in body.split(';').filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(&format!("malformed rule part '{part}'")))?;
        let duplicate = match key {
            "FREQ" => frequency.replace(value.parse::<Frequency>()?).is_some(),
            "INTERVAL" => interval.replace(parse_interval(value)?).is_some(),
            "UNTIL" => until.replace(parse_until(value)?).is_some(),
            "COUNT" => count.replace(parse_count(value)?).is_some(),
            "WKST" => false,
            _ => return Err(invalid(&format!("unsupported rule part '{key}'"))),
        };
        if duplicate {
            return Err(invalid(&format!("duplicate rule part '{key}'")));
        }
    }

    let frequency = frequency.ok_or_else(|| invalid("missing FREQ"))?;
    let end = match (until, count) {
        (None, None) => RuleEnd::Never,
        (Some(cutoff), None) => {
            if cutoff < anchor {
                return Err(invalid("UNTIL precedes DTSTART"));
            }
            RuleEnd::Until(cutoff)
        }
        (None, Some(count)) => RuleEnd::Count(count),
        (Some(_), Some(_)) => return Err(invalid("UNTIL and COUNT are mutually exclusive")),
    };

    Ok(RuleParts {
        anchor,
        frequency,
        interval: interval.unwrap_or(1),
        end,
    })
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, FLOATING_FORMAT))
        .map(|naive| naive.and_utc())
        .map_err(|e| invalid(&format!("bad date-time '{value}': {e}")))
}

fn parse_until(value: &str) -> Result<DateTime<Utc>> {
    if value.contains('T') {
        return parse_instant(value);
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(end_of_day)
        .map_err(|e| invalid(&format!("bad UNTIL '{value}': {e}")))
}

fn parse_interval(value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(invalid(&format!("INTERVAL must be a positive integer, got '{value}'"))),
    }
}

fn parse_count(value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(invalid(&format!("COUNT must be a positive integer, got '{value}'"))),
    }
}

/// Last date on which an occurrence at `anchor`'s time of day is still
/// within `cutoff`.
fn last_covered_date(anchor: DateTime<Utc>, cutoff: DateTime<Utc>) -> NaiveDate {
    let date = cutoff.date_naive();
    if cutoff.time() >= anchor.time() {
        date
    } else {
        date.pred_opt().unwrap_or(date)
    }
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default())
        .and_utc()
}

fn invalid(msg: &str) -> RecurrenceError {
    RecurrenceError::InvalidRule(msg.to_string())
}

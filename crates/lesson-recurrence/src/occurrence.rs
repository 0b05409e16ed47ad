//! Expansion of rule strings into concrete occurrence instants.
//!
//! Every function decodes the rule through [`crate::codec`] first, so an
//! unsupported rule fails with [`RecurrenceError::InvalidRule`] before any
//! expansion happens. Expansion itself is delegated to the `rrule` crate,
//! always from the canonical serialization of the decoded parts.
//!
//! Monthly rules follow RFC 5545: a month that lacks the anchor's
//! day-of-month (the 31st in a 30-day month, the 29th-31st in February)
//! produces no occurrence at all. Nothing is clamped to the month end.

use chrono::{DateTime, Utc};
use rrule::{RRuleSet, Tz};

use crate::codec::{self, RuleEnd, RuleParts};
use crate::error::{RecurrenceError, Result};

/// Upper bound on the number of instants produced by one expansion.
pub const MAX_EXPANSION: u16 = u16::MAX;

/// The last occurrence of a bounded rule.
///
/// Returns `Ok(None)` for a rule that never ends.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded, or
/// [`RecurrenceError::ExpansionLimit`] if the rule produces more than
/// [`MAX_EXPANSION`] occurrences.
///
/// # Examples
///
/// ```
/// use lesson_recurrence::occurrence::last_occurrence;
///
/// let last = last_occurrence("DTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;INTERVAL=1;COUNT=5")
///     .unwrap()
///     .unwrap();
/// assert_eq!(last.to_rfc3339(), "2024-01-29T10:00:00+00:00");
/// ```
pub fn last_occurrence(rule: &str) -> Result<Option<DateTime<Utc>>> {
    let parts = codec::parse(rule)?;
    if parts.end == RuleEnd::Never {
        return Ok(None);
    }
    let dates = expand_capped(rule_set(&parts)?)?;
    Ok(dates.last().copied())
}

/// The earliest occurrence strictly after `from`.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded.
pub fn next_occurrence_after(rule: &str, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let parts = codec::parse(rule)?;
    let set = rule_set(&parts)?.after(to_rrule_tz(from));
    // `after` may include `from` itself, so look at two candidates.
    Ok(expand(set, 2).into_iter().find(|dt| *dt > from))
}

/// The latest occurrence strictly before `before`.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded, or
/// [`RecurrenceError::ExpansionLimit`] if more than [`MAX_EXPANSION`]
/// occurrences precede `before`.
pub fn previous_occurrence_before(
    rule: &str,
    before: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let parts = codec::parse(rule)?;
    if before <= parts.anchor {
        return Ok(None);
    }
    let set = rule_set(&parts)?.before(to_rrule_tz(before));
    let dates = expand_capped(set)?;
    Ok(dates.into_iter().filter(|dt| *dt < before).last())
}

/// Whether `instant` is one of the rule's occurrences.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded.
pub fn is_occurrence(rule: &str, instant: DateTime<Utc>) -> Result<bool> {
    let probe = instant - chrono::Duration::seconds(1);
    Ok(next_occurrence_after(rule, probe)? == Some(instant))
}

/// Whether the rule still produces an occurrence after `after`.
///
/// A rule without an end always does; a bounded rule does iff
/// [`next_occurrence_after`] finds one.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded.
pub fn has_future_occurrences(rule: &str, after: DateTime<Utc>) -> Result<bool> {
    let parts = codec::parse(rule)?;
    if parts.end == RuleEnd::Never {
        return Ok(true);
    }
    Ok(next_occurrence_after(rule, after)?.is_some())
}

/// The first `limit` occurrences, starting at the anchor.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded.
pub fn occurrences(rule: &str, limit: u16) -> Result<Vec<DateTime<Utc>>> {
    let parts = codec::parse(rule)?;
    Ok(expand(rule_set(&parts)?, limit))
}

// ── Internal helpers ────────────────────────────────────────────────────────

fn rule_set(parts: &RuleParts) -> Result<RRuleSet> {
    parts
        .render()
        .parse::<RRuleSet>()
        .map_err(|e| RecurrenceError::InvalidRule(e.to_string()))
}

fn to_rrule_tz(dt: DateTime<Utc>) -> DateTime<Tz> {
    dt.with_timezone(&Tz::Tz(chrono_tz::UTC))
}

fn expand(set: RRuleSet, limit: u16) -> Vec<DateTime<Utc>> {
    set.all(limit)
        .dates
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .collect()
}

/// Expand up to [`MAX_EXPANSION`], treating a full result as truncated.
fn expand_capped(set: RRuleSet) -> Result<Vec<DateTime<Utc>>> {
    let dates = expand(set, MAX_EXPANSION);
    if dates.len() >= usize::from(MAX_EXPANSION) {
        return Err(RecurrenceError::ExpansionLimit(MAX_EXPANSION));
    }
    Ok(dates)
}

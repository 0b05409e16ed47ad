//! The recurrence half of a lesson editing session.
//!
//! A [`RecurrenceState`] lives for one session: created empty for a new
//! lesson, loaded from a rule when an existing lesson is opened, dropped on
//! submit, cancel or close. The baseline is copied once at load and never
//! written again; [`RecurrenceState::has_changed`] compares against it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::warn;

use crate::codec;
use crate::error::{RecurrenceError, Result};
use crate::occurrence;
use crate::options::{EndCondition, Frequency, RecurrenceOptions};
use crate::store::Lesson;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceState {
    recurring: bool,
    current: RecurrenceOptions,
    baseline: Option<RecurrenceOptions>,
}

impl RecurrenceState {
    /// State for a brand-new lesson: not recurring, no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an existing series for editing.
    ///
    /// A count-bounded rule is presented as `Until(last occurrence date)`:
    /// once occurrences have elapsed, a count no longer has an unambiguous
    /// reference point.
    ///
    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidRule`] if the rule cannot be decoded.
    pub fn load(rule: &str) -> Result<(DateTime<Utc>, Self)> {
        let (anchor, mut options) = codec::decode(rule)?;
        if let EndCondition::AfterCount(_) = options.end {
            let last = occurrence::last_occurrence(rule)?.unwrap_or(anchor);
            options.end = EndCondition::Until(last.date_naive());
        }
        Ok((
            anchor,
            Self {
                recurring: true,
                current: options,
                baseline: Some(options),
            },
        ))
    }

    /// State for editing `lesson`. A missing or undecodable rule yields a
    /// non-recurring state.
    pub fn for_lesson(lesson: &Lesson) -> Self {
        let Some(rule) = lesson.recurrence_rule.as_deref() else {
            return Self::new();
        };
        match Self::load(rule) {
            Ok((_, state)) => state,
            Err(err) => {
                warn!(lesson = %lesson.id, error = %err, "treating lesson as non-recurring");
                Self::new()
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn is_recurring(&self) -> bool {
        self.recurring
    }

    /// Whether this session edits an existing series.
    pub fn is_editing(&self) -> bool {
        self.baseline.is_some()
    }

    /// A new series counts as changed once recurrence is switched on; an
    /// existing one once recurrence is switched off or its options differ
    /// from the baseline.
    pub fn has_changed(&self) -> bool {
        match &self.baseline {
            None => self.recurring,
            Some(baseline) => !self.recurring || self.current != *baseline,
        }
    }

    /// `AfterCount` is only offered when creating a series.
    pub fn offers_count(&self) -> bool {
        !self.is_editing()
    }

    pub fn options(&self) -> &RecurrenceOptions {
        &self.current
    }

    pub fn baseline(&self) -> Option<&RecurrenceOptions> {
        self.baseline.as_ref()
    }

    pub fn frequency(&self) -> Frequency {
        self.current.frequency
    }

    pub fn interval(&self) -> u16 {
        self.current.interval
    }

    pub fn end(&self) -> EndCondition {
        self.current.end
    }

    pub fn until(&self) -> Option<NaiveDate> {
        match self.current.end {
            EndCondition::Until(date) => Some(date),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self.current.end {
            EndCondition::AfterCount(count) => Some(count),
            _ => None,
        }
    }

    // ── Mutators ────────────────────────────────────────────────────────

    pub fn set_recurring(&mut self, recurring: bool) {
        self.recurring = recurring;
    }

    pub fn set_frequency(&mut self, frequency: Frequency) {
        self.current.frequency = frequency;
    }

    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidOptions`] for an interval of zero.
    pub fn set_interval(&mut self, interval: u16) -> Result<()> {
        if interval < 1 {
            return Err(RecurrenceError::InvalidOptions(
                "interval must be at least 1".to_string(),
            ));
        }
        self.current.interval = interval;
        Ok(())
    }

    pub fn set_never(&mut self) {
        self.current.end = EndCondition::Never;
    }

    pub fn set_until(&mut self, date: NaiveDate) {
        self.current.end = EndCondition::Until(date);
    }

    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidOptions`] for a count of zero, or
    /// when editing an existing series.
    pub fn set_count(&mut self, count: u32) -> Result<()> {
        if self.is_editing() {
            return Err(RecurrenceError::InvalidOptions(
                "an existing series can only end on a date".to_string(),
            ));
        }
        if count < 1 {
            return Err(RecurrenceError::InvalidOptions(
                "count must be at least 1".to_string(),
            ));
        }
        self.current.end = EndCondition::AfterCount(count);
        Ok(())
    }

    // ── Serialization ───────────────────────────────────────────────────

    /// Rule string for a lesson starting at `date` + `time`, or `None` when
    /// not recurring or the anchor is incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidOptions`] if the options are invalid
    /// for the anchor.
    pub fn to_rule(&self, date: Option<NaiveDate>, time: Option<NaiveTime>) -> Result<Option<String>> {
        codec::encode(date, time, &self.current, self.recurring)
    }

    /// The current options bound to the anchor of `existing`.
    ///
    /// # Errors
    ///
    /// Same as [`codec::rebind`].
    pub fn rebind(&self, existing: &str) -> Result<String> {
        codec::rebind(existing, &self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WEEKLY_FIVE: &str = "DTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;INTERVAL=1;COUNT=5";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── new sessions ────────────────────────────────────────────────────

    #[test]
    fn test_new_state_changes_only_once_recurring() {
        let mut state = RecurrenceState::new();
        assert!(!state.has_changed());
        state.set_recurring(true);
        assert!(state.has_changed());
        assert!(state.offers_count());
    }

    #[test]
    fn test_new_state_accepts_count() {
        let mut state = RecurrenceState::new();
        state.set_count(5).unwrap();
        assert_eq!(state.count(), Some(5));
        assert!(state.set_count(0).is_err());
    }

    #[test]
    fn test_to_rule_when_not_recurring() {
        let state = RecurrenceState::new();
        let rule = state
            .to_rule(Some(date(2024, 1, 1)), NaiveTime::from_hms_opt(10, 0, 0))
            .unwrap();
        assert!(rule.is_none());
    }

    // ── loaded sessions ─────────────────────────────────────────────────

    #[test]
    fn test_load_converts_count_to_until_last_occurrence() {
        let (anchor, state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        assert_eq!(anchor, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(state.until(), Some(date(2024, 1, 29)));
        assert_eq!(state.count(), None);
        assert!(state.is_recurring());
        assert!(!state.offers_count());
    }

    #[test]
    fn test_loaded_state_is_unchanged() {
        let (_, state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        assert!(!state.has_changed());
        assert_eq!(state.baseline(), Some(state.options()));
    }

    #[test]
    fn test_any_mutation_marks_changed() {
        let (_, loaded) = RecurrenceState::load(WEEKLY_FIVE).unwrap();

        let mut state = loaded.clone();
        state.set_frequency(Frequency::Daily);
        assert!(state.has_changed());

        let mut state = loaded.clone();
        state.set_interval(2).unwrap();
        assert!(state.has_changed());

        let mut state = loaded.clone();
        state.set_never();
        assert!(state.has_changed());

        let mut state = loaded;
        state.set_until(date(2024, 2, 5));
        assert!(state.has_changed());
    }

    #[test]
    fn test_switching_recurrence_off_marks_changed() {
        let (_, mut state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        state.set_recurring(false);
        assert!(state.has_changed());
        state.set_recurring(true);
        assert!(!state.has_changed());
    }

    #[test]
    fn test_rebind_unchanged_keeps_occurrences() {
        let rule = "DTSTART:20240101T100000Z\nRRULE:FREQ=DAILY;INTERVAL=1;UNTIL=20240105T090000Z";
        let (_, state) = RecurrenceState::load(rule).unwrap();
        let rebound = state.rebind(rule).unwrap();
        assert_eq!(
            occurrence::occurrences(&rebound, 10).unwrap(),
            occurrence::occurrences(rule, 10).unwrap()
        );
    }

    #[test]
    fn test_reverting_a_change_is_unchanged() {
        let (_, mut state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        state.set_interval(3).unwrap();
        state.set_interval(1).unwrap();
        assert!(!state.has_changed());
    }

    #[test]
    fn test_editing_rejects_count() {
        let (_, mut state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        let err = state.set_count(3).unwrap_err();
        assert!(matches!(err, RecurrenceError::InvalidOptions(_)));
    }

    #[test]
    fn test_rebind_keeps_anchor() {
        let (_, mut state) = RecurrenceState::load(WEEKLY_FIVE).unwrap();
        state.set_interval(2).unwrap();
        let rule = state.rebind(WEEKLY_FIVE).unwrap();
        assert_eq!(
            rule,
            "DTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;INTERVAL=2;UNTIL=20240129T235959Z"
        );
    }

    // ── for_lesson ──────────────────────────────────────────────────────

    #[test]
    fn test_for_lesson_invalid_rule_is_non_recurring() {
        let lesson = Lesson {
            id: crate::store::LessonId(1),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            duration_minutes: 45,
            recurrence_rule: Some(String::new()),
            note: None,
        };
        let state = RecurrenceState::for_lesson(&lesson);
        assert!(!state.is_recurring());
        assert!(!state.is_editing());
    }
}

//! Scope resolution for edits and deletes on a recurring series.
//!
//! Acting on one occurrence of a series either touches that occurrence alone
//! ([`Scope::Single`]) or that occurrence and every later one
//! ([`Scope::Future`]). The four combinations are the closed [`Mutation`]
//! enum, and [`resolve_split`] maps each to exactly one [`SplitPlan`]:
//!
//! | mutation       | plan                                                       |
//! |----------------|------------------------------------------------------------|
//! | `EditSingle`   | detach the target from the series and edit it alone        |
//! | `DeleteSingle` | delete the target; the series rule is unchanged            |
//! | `EditFuture`   | end the old rule before the target, start a new rule there |
//! | `DeleteFuture` | end the old rule before the target, delete the rest        |
//!
//! Everything here is pure; applying a plan is the coordinator's job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec;
use crate::error::{RecurrenceError, Result};
use crate::occurrence;
use crate::options::RecurrenceOptions;
use crate::state::RecurrenceState;
use crate::store::Lesson;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Single,
    Future,
}

/// Field changes an edit applies to a lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LessonChanges {
    pub start: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub note: Option<String>,
}

impl LessonChanges {
    pub fn apply_to(&self, lesson: &mut Lesson) {
        if let Some(start) = self.start {
            lesson.start = start;
        }
        if let Some(duration) = self.duration_minutes {
            lesson.duration_minutes = duration;
        }
        if let Some(note) = &self.note {
            lesson.note = Some(note.clone());
        }
    }
}

/// What the user asked for on an edit, captured from the editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub changes: LessonChanges,
    /// The recurrence the edited lessons should follow; `None` when the user
    /// switched recurrence off.
    pub recurrence: Option<RecurrenceOptions>,
    pub recurrence_changed: bool,
}

impl EditRequest {
    pub fn new(changes: LessonChanges, state: &RecurrenceState) -> Self {
        Self {
            changes,
            recurrence: state.is_recurring().then(|| *state.options()),
            recurrence_changed: state.has_changed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Edit(EditRequest),
    Delete,
}

impl Action {
    pub fn is_edit(&self) -> bool {
        matches!(self, Action::Edit(_))
    }
}

/// An action paired with its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    EditSingle {
        changes: LessonChanges,
    },
    DeleteSingle,
    EditFuture {
        changes: LessonChanges,
        recurrence: Option<RecurrenceOptions>,
    },
    DeleteFuture,
}

impl Mutation {
    pub fn new(action: Action, scope: Scope) -> Self {
        match (action, scope) {
            (Action::Edit(edit), Scope::Single) => Mutation::EditSingle {
                changes: edit.changes,
            },
            (Action::Delete, Scope::Single) => Mutation::DeleteSingle,
            (Action::Edit(edit), Scope::Future) => Mutation::EditFuture {
                changes: edit.changes,
                recurrence: edit.recurrence,
            },
            (Action::Delete, Scope::Future) => Mutation::DeleteFuture,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Mutation::EditSingle { .. } | Mutation::DeleteSingle => Scope::Single,
            Mutation::EditFuture { .. } | Mutation::DeleteFuture => Scope::Future,
        }
    }
}

/// The transformation a scoped mutation implies for a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "plan")]
pub enum SplitPlan {
    /// Clear the target's rule and apply `changes` to it alone.
    Detach {
        split_at: DateTime<Utc>,
        changes: LessonChanges,
    },
    /// Delete the target only.
    Remove { split_at: DateTime<Utc> },
    /// Keep `truncated` for lessons before `split_at` and regenerate the
    /// target and later lessons under `replacement`. `truncated` is `None`
    /// when the split is at the anchor and nothing of the old series remains.
    Split {
        split_at: DateTime<Utc>,
        truncated: Option<String>,
        replacement: Option<String>,
        changes: LessonChanges,
    },
    /// Keep `truncated` for lessons before `split_at`, delete the rest.
    Truncate {
        split_at: DateTime<Utc>,
        truncated: Option<String>,
    },
}

impl SplitPlan {
    pub fn split_at(&self) -> DateTime<Utc> {
        match self {
            SplitPlan::Detach { split_at, .. }
            | SplitPlan::Remove { split_at }
            | SplitPlan::Split { split_at, .. }
            | SplitPlan::Truncate { split_at, .. } => *split_at,
        }
    }
}

/// Compute the plan for `mutation` applied to the occurrence of `rule` at
/// `split_at`.
///
/// For future scope the old rule is truncated with an `UNTIL` equal to the
/// occurrence immediately before `split_at`, so its occurrences before the
/// split are exactly preserved. The replacement rule is anchored at the
/// edited start when the edit moves the lesson, otherwise at `split_at`.
///
/// # Errors
///
/// Returns [`RecurrenceError::InvalidRule`] if `rule` cannot be decoded,
/// [`RecurrenceError::NotAnOccurrence`] if a future-scope `split_at` is not
/// produced by `rule`, or [`RecurrenceError::InvalidOptions`] if the edited
/// recurrence is invalid for its new anchor.
pub fn resolve_split(rule: &str, split_at: DateTime<Utc>, mutation: Mutation) -> Result<SplitPlan> {
    codec::parse(rule)?;
    match mutation {
        Mutation::EditSingle { changes } => Ok(SplitPlan::Detach { split_at, changes }),
        Mutation::DeleteSingle => Ok(SplitPlan::Remove { split_at }),
        Mutation::EditFuture {
            changes,
            recurrence,
        } => {
            let truncated = truncate_before(rule, split_at)?;
            let anchor = changes.start.unwrap_or(split_at);
            let replacement = recurrence
                .map(|options| codec::encode_at(anchor, &options))
                .transpose()?;
            Ok(SplitPlan::Split {
                split_at,
                truncated,
                replacement,
                changes,
            })
        }
        Mutation::DeleteFuture => Ok(SplitPlan::Truncate {
            split_at,
            truncated: truncate_before(rule, split_at)?,
        }),
    }
}

/// Plan for a lesson that has no usable rule: every mutation is single.
pub fn resolve_standalone(split_at: DateTime<Utc>, mutation: Mutation) -> SplitPlan {
    match mutation {
        Mutation::EditSingle { changes } | Mutation::EditFuture { changes, .. } => {
            SplitPlan::Detach { split_at, changes }
        }
        Mutation::DeleteSingle | Mutation::DeleteFuture => SplitPlan::Remove { split_at },
    }
}

fn truncate_before(rule: &str, split_at: DateTime<Utc>) -> Result<Option<String>> {
    if !occurrence::is_occurrence(rule, split_at)? {
        return Err(RecurrenceError::NotAnOccurrence(split_at));
    }
    occurrence::previous_occurrence_before(rule, split_at)?
        .map(|previous| codec::truncate(rule, previous))
        .transpose()
}

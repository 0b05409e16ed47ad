//! Sequencing of scoped series mutations.
//!
//! ```text
//! Idle ─request─▶ ScopePending ─resolve─▶ [RecurrenceChangePending] ─confirm─▶ Resolving ─▶ Idle
//!   └──────────── (lesson without a usable rule: implicit Single) ────────────────▲
//! ```
//!
//! The coordinator turns the [`SplitPlan`] into one batch of [`LessonOp`]s
//! and hands it to the store in a single write, so the truncation of the old
//! rule and the creation or deletion of later lessons commit together or not
//! at all. Cancellation is only possible before `Resolving`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::EngineConfig;
use crate::error::{RecurrenceError, Result};
use crate::occurrence;
use crate::scope::{
    resolve_split, resolve_standalone, Action, LessonChanges, Mutation, Scope, SplitPlan,
};
use crate::store::{Lesson, LessonId, LessonOp, LessonStore, NewLesson};

// ── Per-lesson guard ────────────────────────────────────────────────────────

/// Set of lesson ids with a mutation currently resolving. Clones share state,
/// so coordinators built over the same store must share one guard.
#[derive(Debug, Clone, Default)]
pub struct MutationGuard {
    active: Arc<Mutex<HashSet<LessonId>>>,
}

impl MutationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` if it is already claimed. The claim is released
    /// when the token drops.
    pub fn try_acquire(&self, id: LessonId) -> Option<GuardToken> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(id).then(|| GuardToken {
            active: Arc::clone(&self.active),
            id,
        })
    }

    pub fn is_active(&self, id: LessonId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

#[derive(Debug)]
pub struct GuardToken {
    active: Arc<Mutex<HashSet<LessonId>>>,
    id: LessonId,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ── State machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CoordinatorState {
    #[default]
    Idle,
    ScopePending {
        action: Action,
        lesson: Lesson,
    },
    RecurrenceChangePending {
        action: Action,
        lesson: Lesson,
    },
    Resolving {
        lesson: LessonId,
    },
}

/// Outcome of a successful plan application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub plan: SplitPlan,
    pub operations: usize,
    /// The caller should reload its lessons.
    pub refresh: bool,
}

/// What the caller has to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Ask the user for [`Scope::Single`] or [`Scope::Future`], then call
    /// [`SeriesMutationCoordinator::resolve`].
    ScopeRequired,
    /// Ask the user to confirm reshaping every future occurrence, then call
    /// [`SeriesMutationCoordinator::confirm_recurrence_change`].
    RecurrenceChangeConfirmationRequired,
    Completed(MutationReport),
}

/// Drives one mutation flow at a time. Every coordinator over the same store
/// is built with a clone of the same [`MutationGuard`]; the guard is what
/// rejects a second flow for a lesson that is already resolving.
pub struct SeriesMutationCoordinator<S> {
    store: S,
    config: EngineConfig,
    guard: MutationGuard,
    state: CoordinatorState,
}

impl<S: LessonStore> SeriesMutationCoordinator<S> {
    pub fn new(store: S, config: EngineConfig, guard: MutationGuard) -> Self {
        Self {
            store,
            config,
            guard,
            state: CoordinatorState::Idle,
        }
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Start an edit or delete on `lesson`.
    ///
    /// A lesson with a decodable rule waits for a scope choice; any other
    /// lesson is mutated immediately with single scope.
    ///
    /// # Errors
    ///
    /// [`RecurrenceError::InvalidTransition`] unless idle, plus everything
    /// applying a plan can return.
    pub async fn request(&mut self, action: Action, lesson: Lesson) -> Result<Step> {
        if self.state != CoordinatorState::Idle {
            return Err(RecurrenceError::InvalidTransition(
                "another mutation flow is open".to_string(),
            ));
        }
        if usable_rule(&lesson).is_some() {
            debug!(lesson = %lesson.id, "awaiting scope choice");
            self.state = CoordinatorState::ScopePending { action, lesson };
            return Ok(Step::ScopeRequired);
        }
        self.execute(Mutation::new(action, Scope::Single), lesson)
            .await
    }

    /// Continue with the user's scope choice.
    ///
    /// # Errors
    ///
    /// [`RecurrenceError::InvalidTransition`] unless a scope is pending, plus
    /// everything applying a plan can return.
    pub async fn resolve(&mut self, scope: Scope) -> Result<Step> {
        let (action, lesson) = match std::mem::take(&mut self.state) {
            CoordinatorState::ScopePending { action, lesson } => (action, lesson),
            other => {
                self.state = other;
                return Err(RecurrenceError::InvalidTransition(
                    "no scope choice is pending".to_string(),
                ));
            }
        };

        let reshapes_future = matches!(&action, Action::Edit(edit) if edit.recurrence_changed);
        if scope == Scope::Future && reshapes_future {
            debug!(lesson = %lesson.id, "awaiting recurrence change confirmation");
            self.state = CoordinatorState::RecurrenceChangePending { action, lesson };
            return Ok(Step::RecurrenceChangeConfirmationRequired);
        }
        self.execute(Mutation::new(action, scope), lesson).await
    }

    /// Confirm that every future occurrence takes the new recurrence.
    ///
    /// # Errors
    ///
    /// [`RecurrenceError::InvalidTransition`] unless a confirmation is
    /// pending, plus everything applying a plan can return.
    pub async fn confirm_recurrence_change(&mut self) -> Result<Step> {
        let (action, lesson) = match std::mem::take(&mut self.state) {
            CoordinatorState::RecurrenceChangePending { action, lesson } => (action, lesson),
            other => {
                self.state = other;
                return Err(RecurrenceError::InvalidTransition(
                    "no recurrence change confirmation is pending".to_string(),
                ));
            }
        };
        self.execute(Mutation::new(action, Scope::Future), lesson)
            .await
    }

    /// Abandon a pending flow. Returns whether there was one to abandon.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            CoordinatorState::ScopePending { .. }
            | CoordinatorState::RecurrenceChangePending { .. } => {
                debug!("mutation flow cancelled");
                self.state = CoordinatorState::Idle;
                true
            }
            CoordinatorState::Idle | CoordinatorState::Resolving { .. } => false,
        }
    }

    async fn execute(&mut self, mutation: Mutation, lesson: Lesson) -> Result<Step> {
        let Some(_token) = self.guard.try_acquire(lesson.id) else {
            self.state = CoordinatorState::Idle;
            return Err(RecurrenceError::MutationInProgress(lesson.id));
        };

        self.state = CoordinatorState::Resolving { lesson: lesson.id };
        let outcome = self.apply(mutation, &lesson).await;
        self.state = CoordinatorState::Idle;

        match outcome {
            Ok(report) => {
                info!(
                    lesson = %lesson.id,
                    operations = report.operations,
                    "series mutation committed"
                );
                Ok(Step::Completed(report))
            }
            Err(err) => {
                warn!(lesson = %lesson.id, error = %err, "series mutation failed");
                Err(err)
            }
        }
    }

    async fn apply(&self, mutation: Mutation, target: &Lesson) -> Result<MutationReport> {
        let plan = match usable_rule(target) {
            Some(rule) => resolve_split(rule, target.start, mutation)?,
            None => resolve_standalone(target.start, mutation),
        };
        let ops = self.operations(&plan, target).await?;
        let operations = ops.len();
        debug!(lesson = %target.id, operations, "writing split plan");
        self.store.apply(ops).await?;
        Ok(MutationReport {
            plan,
            operations,
            refresh: true,
        })
    }

    async fn operations(&self, plan: &SplitPlan, target: &Lesson) -> Result<Vec<LessonOp>> {
        match plan {
            SplitPlan::Detach { changes, .. } => {
                let mut detached = target.clone();
                detached.recurrence_rule = None;
                changes.apply_to(&mut detached);
                Ok(vec![LessonOp::Update(detached)])
            }
            SplitPlan::Remove { .. } => Ok(vec![LessonOp::Delete { id: target.id }]),
            SplitPlan::Split {
                split_at,
                truncated,
                replacement,
                changes,
            } => {
                let mut ops = self
                    .cut_series(target, *split_at, truncated.as_deref())
                    .await?;
                ops.extend(self.regenerate(target, replacement.as_deref(), changes)?);
                Ok(ops)
            }
            SplitPlan::Truncate {
                split_at,
                truncated,
            } => {
                self.cut_series(target, *split_at, truncated.as_deref())
                    .await
            }
        }
    }

    /// Rebind lessons before `split_at` to `truncated`; delete the target
    /// and everything after it.
    async fn cut_series(
        &self,
        target: &Lesson,
        split_at: chrono::DateTime<chrono::Utc>,
        truncated: Option<&str>,
    ) -> Result<Vec<LessonOp>> {
        let Some(rule) = target.recurrence_rule.as_deref() else {
            return Ok(vec![LessonOp::Delete { id: target.id }]);
        };

        let mut ops = Vec::new();
        let mut target_seen = false;
        for lesson in self.store.series_lessons(rule).await? {
            if lesson.id == target.id || lesson.start >= split_at {
                target_seen |= lesson.id == target.id;
                ops.push(LessonOp::Delete { id: lesson.id });
            } else if let Some(truncated) = truncated {
                ops.push(LessonOp::Update(Lesson {
                    recurrence_rule: Some(truncated.to_string()),
                    ..lesson
                }));
            }
        }
        if !target_seen {
            ops.push(LessonOp::Delete { id: target.id });
        }
        Ok(ops)
    }

    /// Lessons for the target and later occurrences under `replacement`.
    fn regenerate(
        &self,
        target: &Lesson,
        replacement: Option<&str>,
        changes: &LessonChanges,
    ) -> Result<Vec<LessonOp>> {
        let duration_minutes = changes.duration_minutes.unwrap_or(target.duration_minutes);
        let note = changes.note.clone().or_else(|| target.note.clone());

        let Some(rule) = replacement else {
            return Ok(vec![LessonOp::Create(NewLesson {
                start: changes.start.unwrap_or(target.start),
                duration_minutes,
                recurrence_rule: None,
                note,
            })]);
        };

        let starts = occurrence::occurrences(rule, self.config.materialize_limit)?;
        Ok(starts
            .into_iter()
            .map(|start| {
                LessonOp::Create(NewLesson {
                    start,
                    duration_minutes,
                    recurrence_rule: Some(rule.to_string()),
                    note: note.clone(),
                })
            })
            .collect())
    }
}

/// The lesson's rule if it decodes; an undecodable rule counts as none.
fn usable_rule(lesson: &Lesson) -> Option<&str> {
    let rule = lesson.recurrence_rule.as_deref()?;
    match codec::decode(rule) {
        Ok(_) => Some(rule),
        Err(err) => {
            warn!(lesson = %lesson.id, error = %err, "ignoring undecodable recurrence rule");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejects_second_claim() {
        let guard = MutationGuard::new();
        let token = guard.try_acquire(LessonId(1)).unwrap();
        assert!(guard.try_acquire(LessonId(1)).is_none());
        assert!(guard.try_acquire(LessonId(2)).is_some());
        assert!(guard.is_active(LessonId(1)));
        drop(token);
        assert!(!guard.is_active(LessonId(1)));
    }

    #[test]
    fn test_guard_clones_share_claims() {
        let guard = MutationGuard::new();
        let other = guard.clone();
        let _token = guard.try_acquire(LessonId(7)).unwrap();
        assert!(other.try_acquire(LessonId(7)).is_none());
    }
}

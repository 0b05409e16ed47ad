//! The lesson store boundary.
//!
//! The engine never owns lesson rows. It reads the lessons of a series and
//! writes one batch of [`LessonOp`]s per mutation through [`LessonStore`].
//! Implementations must apply a batch atomically: either every operation is
//! committed or none is.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonId(pub u64);

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored lesson. A lesson with a `recurrence_rule` is one occurrence of
/// the series identified by that rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub recurrence_rule: Option<String>,
    pub note: Option<String>,
}

/// A lesson about to be created; the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub recurrence_rule: Option<String>,
    pub note: Option<String>,
}

impl NewLesson {
    fn with_id(self, id: LessonId) -> Lesson {
        Lesson {
            id,
            start: self.start,
            duration_minutes: self.duration_minutes,
            recurrence_rule: self.recurrence_rule,
            note: self.note,
        }
    }
}

/// One write in a mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum LessonOp {
    Update(Lesson),
    Delete { id: LessonId },
    Create(NewLesson),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("lesson {0} not found")]
    NotFound(LessonId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Narrow async interface to wherever lessons live.
pub trait LessonStore: Send + Sync {
    /// Lessons carrying exactly `rule`, ordered by start.
    fn series_lessons(
        &self,
        rule: &str,
    ) -> impl Future<Output = Result<Vec<Lesson>, StoreError>> + Send;

    /// Apply `ops` as one unit: all of them, or none.
    fn apply(&self, ops: Vec<LessonOp>) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    lessons: BTreeMap<LessonId, Lesson>,
    next_id: u64,
    fail_next_write: bool,
}

impl MemoryState {
    fn allocate(&mut self, lesson: NewLesson) -> Lesson {
        self.next_id += 1;
        let lesson = lesson.with_id(LessonId(self.next_id));
        self.lessons.insert(lesson.id, lesson.clone());
        lesson
    }
}

/// In-process [`LessonStore`]. Clones share the same lessons.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLessonStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryLessonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, lesson: NewLesson) -> Lesson {
        self.state.lock().await.allocate(lesson)
    }

    pub async fn get(&self, id: LessonId) -> Option<Lesson> {
        self.state.lock().await.lessons.get(&id).cloned()
    }

    /// All lessons, ordered by start then id.
    pub async fn all(&self) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> = self.state.lock().await.lessons.values().cloned().collect();
        lessons.sort_by_key(|l| (l.start, l.id));
        lessons
    }

    /// Make the next [`LessonStore::apply`] fail without touching any lesson.
    pub async fn fail_next_write(&self) {
        self.state.lock().await.fail_next_write = true;
    }
}

impl LessonStore for InMemoryLessonStore {
    async fn series_lessons(&self, rule: &str) -> Result<Vec<Lesson>, StoreError> {
        let state = self.state.lock().await;
        let mut lessons: Vec<Lesson> = state
            .lessons
            .values()
            .filter(|l| l.recurrence_rule.as_deref() == Some(rule))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| (l.start, l.id));
        Ok(lessons)
    }

    async fn apply(&self, ops: Vec<LessonOp>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if std::mem::take(&mut state.fail_next_write) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }

        // Stage on a copy so a failing op leaves the committed state untouched.
        let mut staged = MemoryState {
            lessons: state.lessons.clone(),
            next_id: state.next_id,
            fail_next_write: false,
        };
        for op in ops {
            match op {
                LessonOp::Update(lesson) => {
                    let slot = staged
                        .lessons
                        .get_mut(&lesson.id)
                        .ok_or(StoreError::NotFound(lesson.id))?;
                    *slot = lesson;
                }
                LessonOp::Delete { id } => {
                    staged.lessons.remove(&id).ok_or(StoreError::NotFound(id))?;
                }
                LessonOp::Create(lesson) => {
                    staged.allocate(lesson);
                }
            }
        }
        *state = staged;
        Ok(())
    }
}

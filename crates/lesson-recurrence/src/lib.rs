//! # lesson-recurrence
//!
//! Recurrence engine for lesson series.
//!
//! Lessons that repeat carry a rule string (an anchored RRULE subset). This
//! crate decodes and encodes those rules, expands them into occurrences, keeps
//! track of what the user changed while editing, and works out how an edit or
//! delete on one occurrence splits the series.
//!
//! ## Modules
//!
//! - [`codec`] — rule string ⇄ anchor + [`RecurrenceOptions`]
//! - [`occurrence`] — last/next/previous occurrence and future checks
//! - [`state`] — editing-session recurrence state with change detection
//! - [`scope`] — single vs. future scope → [`SplitPlan`]
//! - [`coordinator`] — confirmation state machine that applies a plan to the store
//! - [`store`] — lesson store boundary and an in-memory implementation
//! - [`config`] — engine configuration
//! - [`error`] — Error types

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod occurrence;
pub mod options;
pub mod scope;
pub mod state;
pub mod store;

pub use codec::{decode, encode, encode_at, rebind, truncate};
pub use config::EngineConfig;
pub use coordinator::{
    CoordinatorState, GuardToken, MutationGuard, MutationReport, SeriesMutationCoordinator, Step,
};
pub use error::{RecurrenceError, Result};
pub use occurrence::{
    has_future_occurrences, is_occurrence, last_occurrence, next_occurrence_after, occurrences,
    previous_occurrence_before,
};
pub use options::{EndCondition, Frequency, RecurrenceOptions};
pub use scope::{
    resolve_split, resolve_standalone, Action, EditRequest, LessonChanges, Mutation, Scope,
    SplitPlan,
};
pub use state::RecurrenceState;
pub use store::{InMemoryLessonStore, Lesson, LessonId, LessonOp, LessonStore, NewLesson, StoreError};

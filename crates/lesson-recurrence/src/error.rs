//! Error types for recurrence engine operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::{LessonId, StoreError};

#[derive(Error, Debug)]
pub enum RecurrenceError {
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid recurrence options: {0}")]
    InvalidOptions(String),

    #[error("Not an occurrence of the series: {0}")]
    NotAnOccurrence(DateTime<Utc>),

    #[error("Expansion exceeded maximum limit of {0} occurrences")]
    ExpansionLimit(u16),

    #[error("A mutation is already resolving for lesson {0}")]
    MutationInProgress(LessonId),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Series mutation failed: {0}")]
    SeriesMutation(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RecurrenceError>;

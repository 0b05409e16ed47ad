use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use lesson_recurrence::{EndCondition, Frequency, RecurrenceOptions};

/// Inspect and split lesson recurrence rules.
///
/// Rules are given as `DTSTART:<instant> RRULE:<rule>`; the two parts may be
/// separated by a newline or a space.
#[derive(Parser)]
#[command(version, about, name = "recur")]
pub struct Args {
    /// JSON engine configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a rule into its anchor and options
    Decode { rule: String },
    /// Build a rule from a start date, time and options
    Encode {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        time: NaiveTime,
        #[command(flatten)]
        shape: ShapeArgs,
    },
    /// List the first occurrences of a rule
    Expand {
        rule: String,
        #[arg(long, default_value_t = 10)]
        limit: u16,
    },
    /// Print the last occurrence of a bounded rule
    Last { rule: String },
    /// Print the first occurrence strictly after an instant
    Next {
        rule: String,
        #[arg(long)]
        after: DateTime<Utc>,
    },
    /// Compute the plan for changing an occurrence and all later ones
    Split {
        rule: String,
        /// The occurrence being acted on
        #[arg(long)]
        at: DateTime<Utc>,
        /// Delete instead of edit
        #[arg(long, conflicts_with_all = ["freq", "interval", "until", "count", "never"])]
        delete: bool,
        #[command(flatten)]
        shape: ShapeArgs,
    },
}

#[derive(ClapArgs)]
pub struct ShapeArgs {
    /// daily, weekly or monthly
    #[arg(long, default_value_t = Frequency::Weekly)]
    pub freq: Frequency,
    #[arg(long, default_value_t = 1)]
    pub interval: u16,
    /// Last date (inclusive) an occurrence may fall on
    #[arg(long, conflicts_with_all = ["count", "never"])]
    pub until: Option<NaiveDate>,
    /// Total number of occurrences
    #[arg(long, conflicts_with = "never")]
    pub count: Option<u32>,
    /// Repeat forever (the default when neither --until nor --count is given)
    #[arg(long)]
    pub never: bool,
}

impl ShapeArgs {
    pub fn options(&self) -> RecurrenceOptions {
        let end = match (self.until, self.count) {
            (Some(date), _) => EndCondition::Until(date),
            (None, Some(count)) => EndCondition::AfterCount(count),
            (None, None) => EndCondition::Never,
        };
        RecurrenceOptions::new(self.freq, self.interval, end)
    }
}

use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

/// One character's state at one snapshot date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub entity_id: String,
    pub observed_at: NaiveDate,
    pub level: Option<i32>,
    pub experience: Option<i64>,
    pub guild_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    FirstSeen,
    Growing,
    Stagnant,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::FirstSeen => "FIRST_SEEN",
            ActivityState::Growing => "GROWING",
            ActivityState::Stagnant => "STAGNANT",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open level range `[lower, lower + width)`, labelled `lower~upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LevelBucket {
    pub index: u32,
    pub lower: i32,
    /// Last level inside the bucket.
    pub upper: i32,
}

impl LevelBucket {
    pub fn label(&self) -> String {
        format!("{}~{}", self.lower, self.upper)
    }
}

impl fmt::Display for LevelBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.lower, self.upper)
    }
}

impl Serialize for LevelBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedObservation {
    pub entity_id: String,
    pub observed_at: NaiveDate,
    pub level: Option<i32>,
    pub experience: Option<i64>,
    pub experience_delta: i64,
    pub activity_state: ActivityState,
    pub level_bucket: Option<LevelBucket>,
    pub guild_present: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortAggregate {
    pub observed_at: NaiveDate,
    pub activity_state: ActivityState,
    pub level_bucket: LevelBucket,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagnationSummary {
    pub level_bucket: LevelBucket,
    pub activity_state: ActivityState,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityTrend {
    pub observed_at: NaiveDate,
    pub activity_state: ActivityState,
    pub count: usize,
    pub percentage: f64,
}

/// Distribution of positive weekly experience gains for one guild flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuildGrowthSummary {
    pub guild_present: bool,
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateObservation {
    pub entity_id: String,
    pub observed_at: NaiveDate,
    /// Rows dropped in favour of the first occurrence.
    pub dropped: usize,
}

/// Data-quality findings collected while running the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub rows_read: usize,
    pub observations: usize,
    pub malformed: Vec<MalformedRow>,
    pub coerced_fields: usize,
    pub duplicates: Vec<DuplicateObservation>,
    pub unbucketed: usize,
}

impl Diagnostics {
    pub fn excluded_rows(&self) -> usize {
        self.malformed.len()
    }

    pub fn dropped_duplicates(&self) -> usize {
        self.duplicates.iter().map(|dup| dup.dropped).sum()
    }
}

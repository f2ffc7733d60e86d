//! Pipeline configuration.
//!
//! Every field has a default matching the 260+ progression snapshots, so an
//! empty (or absent) TOML file is a valid configuration:
//!
//! ```toml
//! max_malformed_ratio = 0.05
//! malformed_rows = "strict"
//!
//! [columns]
//! entity_id = "ocid"
//!
//! [levels]
//! floor = 260
//! ceiling = 300
//! width = 5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// What ingestion does with a row whose date or entity id cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRowPolicy {
    /// Exclude the row and record it in the diagnostics.
    #[default]
    Skip,
    /// Fail the whole run on the first malformed row.
    Strict,
}

/// Source column names for each logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub entity_id: String,
    pub date: String,
    pub level: String,
    pub experience: String,
    /// Optional in the input; absent means nobody is in a guild.
    pub guild_name: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            entity_id: "ocid".to_string(),
            date: "date".to_string(),
            level: "character_level".to_string(),
            experience: "character_exp".to_string(),
            guild_name: "character_guild_name".to_string(),
        }
    }
}

/// Analyzed level range `[floor, ceiling)` split into buckets of `width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelRange {
    pub floor: i32,
    pub ceiling: i32,
    pub width: i32,
}

impl Default for LevelRange {
    fn default() -> Self {
        Self {
            floor: 260,
            ceiling: 300,
            width: 5,
        }
    }
}

impl LevelRange {
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "bucket width must be positive, got {}",
                self.width
            )));
        }
        if self.ceiling <= self.floor {
            return Err(PipelineError::InvalidConfig(format!(
                "level ceiling {} must be above floor {}",
                self.ceiling, self.floor
            )));
        }
        let span = self.ceiling.checked_sub(self.floor).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "level span {}..{} does not fit in a 32-bit level",
                self.floor, self.ceiling
            ))
        })?;
        if span % self.width != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "level span {}..{} is not a multiple of bucket width {}",
                self.floor, self.ceiling, self.width
            )));
        }
        Ok(())
    }

    pub fn bucket_count(&self) -> u32 {
        ((self.ceiling - self.floor) / self.width) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnMap,
    pub levels: LevelRange,
    pub malformed_rows: MalformedRowPolicy,
    /// Fraction of excluded rows above which the run is rejected.
    pub max_malformed_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMap::default(),
            levels: LevelRange::default(),
            malformed_rows: MalformedRowPolicy::Skip,
            max_malformed_ratio: 0.10,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.levels.validate()?;
        if !(0.0..=1.0).contains(&self.max_malformed_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_malformed_ratio must be within 0..=1, got {}",
                self.max_malformed_ratio
            )));
        }
        Ok(())
    }
}

use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::activity::{self, LevelBuckets};
use crate::aggregate;
use crate::cache::{CacheStats, ResultCache, SourceKey};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ingest::{self, Ingested};
use crate::models::{
    ActivityTrend, ClassifiedObservation, CohortAggregate, Diagnostics, GuildGrowthSummary,
    StagnationSummary,
};

/// Every table derived from one snapshot file.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub classified: Vec<ClassifiedObservation>,
    pub cohorts: Vec<CohortAggregate>,
    pub stagnation: Vec<StagnationSummary>,
    pub trend: Vec<ActivityTrend>,
    pub guild_growth: Vec<GuildGrowthSummary>,
    pub diagnostics: Diagnostics,
}

pub fn run(ingested: Ingested, buckets: &LevelBuckets) -> PipelineOutput {
    let Ingested {
        observations,
        rows_read,
        malformed,
        coerced_fields,
    } = ingested;

    let classified = activity::classify(observations, buckets);
    let diagnostics = Diagnostics {
        rows_read,
        observations: classified.rows.len(),
        malformed,
        coerced_fields,
        unbucketed: classified.unbucketed(),
        duplicates: classified.duplicates,
    };

    let rows = classified.rows;
    PipelineOutput {
        cohorts: aggregate::cohort_aggregates(&rows),
        stagnation: aggregate::stagnation_by_bucket(&rows),
        trend: aggregate::activity_trend(&rows),
        guild_growth: aggregate::guild_growth(&rows),
        classified: rows,
        diagnostics,
    }
}

pub fn run_reader<R: io::Read>(reader: R, config: &PipelineConfig) -> Result<PipelineOutput> {
    let buckets = LevelBuckets::new(config.levels)?;
    let ingested = ingest::read_observations(reader, config)?;
    Ok(run(ingested, &buckets))
}

/// Runs the pipeline over snapshot files, reusing results for unchanged files.
pub struct CohortPipeline {
    config: PipelineConfig,
    buckets: LevelBuckets,
    cache: ResultCache<PipelineOutput>,
}

impl CohortPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let buckets = LevelBuckets::new(config.levels)?;
        Ok(Self {
            config,
            buckets,
            cache: ResultCache::new(),
        })
    }

    pub fn buckets(&self) -> &LevelBuckets {
        &self.buckets
    }

    pub fn load(&mut self, path: &Path) -> Result<Arc<PipelineOutput>> {
        let key = SourceKey::for_path(path)?;
        let config = &self.config;
        let buckets = &self.buckets;
        let output = self.cache.get_or_try_insert_with(key, || -> Result<PipelineOutput> {
            let ingested = ingest::load_observations(path, config)?;
            let output = run(ingested, buckets);
            info!(
                observations = output.diagnostics.observations,
                duplicates = output.diagnostics.dropped_duplicates(),
                unbucketed = output.diagnostics.unbucketed,
                cohort_rows = output.cohorts.len(),
                "pipeline complete"
            );
            Ok(output)
        })?;
        Ok(output)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

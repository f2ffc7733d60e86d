use std::collections::BTreeMap;

use crate::models::{
    ActivityState, ActivityTrend, ClassifiedObservation, CohortAggregate, GuildGrowthSummary,
    LevelBucket, StagnationSummary,
};

/// Counts `(partition, key)` pairs and turns each count into its share of the
/// partition total. Partitions without rows never appear.
fn partition_shares<P, K>(pairs: impl Iterator<Item = (P, K)>) -> Vec<(P, K, usize, f64)>
where
    P: Ord + Copy,
    K: Ord + Copy,
{
    let mut counts: BTreeMap<(P, K), usize> = BTreeMap::new();
    let mut totals: BTreeMap<P, usize> = BTreeMap::new();

    for (partition, key) in pairs {
        *counts.entry((partition, key)).or_insert(0) += 1;
        *totals.entry(partition).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|((partition, key), count)| {
            let total = totals.get(&partition).copied().unwrap_or(count);
            (partition, key, count, count as f64 / total as f64 * 100.0)
        })
        .collect()
}

fn is_followup(row: &ClassifiedObservation) -> bool {
    row.activity_state != ActivityState::FirstSeen
}

/// Level distribution per (date, state), for the growth/stagnation heatmaps.
pub fn cohort_aggregates(rows: &[ClassifiedObservation]) -> Vec<CohortAggregate> {
    let pairs = rows.iter().filter(|row| is_followup(row)).filter_map(|row| {
        row.level_bucket
            .map(|bucket| ((row.observed_at, row.activity_state), bucket))
    });

    partition_shares(pairs)
        .into_iter()
        .map(
            |((observed_at, activity_state), level_bucket, count, percentage)| CohortAggregate {
                observed_at,
                activity_state,
                level_bucket,
                count,
                percentage,
            },
        )
        .collect()
}

/// Growing/stagnant split per level bucket over the whole observed period.
pub fn stagnation_by_bucket(rows: &[ClassifiedObservation]) -> Vec<StagnationSummary> {
    let pairs = rows
        .iter()
        .filter(|row| is_followup(row))
        .filter_map(|row| row.level_bucket.map(|bucket| (bucket, row.activity_state)));

    partition_shares(pairs)
        .into_iter()
        .map(
            |(level_bucket, activity_state, count, percentage)| StagnationSummary {
                level_bucket,
                activity_state,
                count,
                percentage,
            },
        )
        .collect()
}

/// Share of stagnant observations in `bucket`; `None` when the bucket has no data.
pub fn stagnation_rate(summary: &[StagnationSummary], bucket: &LevelBucket) -> Option<f64> {
    let mut seen = false;
    let mut rate = 0.0;
    for row in summary.iter().filter(|row| row.level_bucket == *bucket) {
        seen = true;
        if row.activity_state == ActivityState::Stagnant {
            rate = row.percentage;
        }
    }
    seen.then_some(rate)
}

/// Weekly growing/stagnant ratio, including observations outside the level range.
pub fn activity_trend(rows: &[ClassifiedObservation]) -> Vec<ActivityTrend> {
    let pairs = rows
        .iter()
        .filter(|row| is_followup(row))
        .map(|row| (row.observed_at, row.activity_state));

    partition_shares(pairs)
        .into_iter()
        .map(
            |(observed_at, activity_state, count, percentage)| ActivityTrend {
                observed_at,
                activity_state,
                count,
                percentage,
            },
        )
        .collect()
}

/// Weekly gain distribution for guild members against non-members.
pub fn guild_growth(rows: &[ClassifiedObservation]) -> Vec<GuildGrowthSummary> {
    let mut gains: BTreeMap<bool, Vec<f64>> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.experience_delta > 0) {
        gains
            .entry(row.guild_present)
            .or_default()
            .push(row.experience_delta as f64);
    }

    gains
        .into_iter()
        .map(|(guild_present, mut values)| {
            values.sort_by(|a, b| a.total_cmp(b));
            let count = values.len();
            GuildGrowthSummary {
                guild_present,
                count,
                min: values[0],
                q1: quantile(&values, 0.25),
                median: quantile(&values, 0.5),
                q3: quantile(&values, 0.75),
                max: values[count - 1],
                mean: values.iter().sum::<f64>() / count as f64,
            }
        })
        .collect()
}

/// Linear-interpolation quantile of a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

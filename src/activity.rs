use std::cmp::Ordering;

use tracing::warn;

use crate::config::LevelRange;
use crate::error::Result;
use crate::models::{
    ActivityState, ClassifiedObservation, DuplicateObservation, LevelBucket, Observation,
};

/// Fixed-width, left-inclusive level buckets over a validated range.
#[derive(Debug, Clone, Copy)]
pub struct LevelBuckets {
    range: LevelRange,
}

impl LevelBuckets {
    pub fn new(range: LevelRange) -> Result<Self> {
        range.validate()?;
        Ok(Self { range })
    }

    pub fn bucket_for(&self, level: i32) -> Option<LevelBucket> {
        if level < self.range.floor || level >= self.range.ceiling {
            return None;
        }
        let index = ((level - self.range.floor) / self.range.width) as u32;
        Some(self.bucket_at(index))
    }

    pub fn all(&self) -> impl Iterator<Item = LevelBucket> + '_ {
        (0..self.range.bucket_count()).map(|index| self.bucket_at(index))
    }

    fn bucket_at(&self, index: u32) -> LevelBucket {
        let lower = self.range.floor + index as i32 * self.range.width;
        LevelBucket {
            index,
            lower,
            upper: lower + self.range.width - 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classified {
    pub rows: Vec<ClassifiedObservation>,
    pub duplicates: Vec<DuplicateObservation>,
}

impl Classified {
    pub fn unbucketed(&self) -> usize {
        self.rows.iter().filter(|row| row.level_bucket.is_none()).count()
    }
}

fn timeline_order(a: &Observation, b: &Observation) -> Ordering {
    a.entity_id
        .cmp(&b.entity_id)
        .then(a.observed_at.cmp(&b.observed_at))
}

/// Sorts by entity then date and keeps the first input row of every
/// (entity, date) pair. The sort is stable, so "first" means input order.
pub fn order_timelines(
    mut observations: Vec<Observation>,
) -> (Vec<Observation>, Vec<DuplicateObservation>) {
    observations.sort_by(timeline_order);

    let mut ordered: Vec<Observation> = Vec::with_capacity(observations.len());
    let mut duplicates: Vec<DuplicateObservation> = Vec::new();

    for observation in observations {
        let repeated = ordered
            .last()
            .map(|kept| timeline_order(kept, &observation) == Ordering::Equal)
            .unwrap_or(false);

        if !repeated {
            ordered.push(observation);
            continue;
        }

        match duplicates.last_mut() {
            Some(dup)
                if dup.entity_id == observation.entity_id
                    && dup.observed_at == observation.observed_at =>
            {
                dup.dropped += 1;
            }
            _ => duplicates.push(DuplicateObservation {
                entity_id: observation.entity_id,
                observed_at: observation.observed_at,
                dropped: 1,
            }),
        }
    }

    (ordered, duplicates)
}

/// Contiguous per-entity slices of an ordered arena.
fn entity_slices<'a>(ordered: &'a [Observation]) -> impl Iterator<Item = &'a [Observation]> {
    let mut rest = ordered;
    std::iter::from_fn(move || {
        let current: &'a [Observation] = rest;
        let first = current.first()?;
        let len = current
            .iter()
            .take_while(|observation| observation.entity_id == first.entity_id)
            .count();
        let (slice, tail) = current.split_at(len);
        rest = tail;
        Some(slice)
    })
}

pub fn classify_state(is_first: bool, experience_delta: i64) -> ActivityState {
    if is_first {
        ActivityState::FirstSeen
    } else if experience_delta > 0 {
        ActivityState::Growing
    } else {
        ActivityState::Stagnant
    }
}

/// Week-over-week delta; a missing operand counts as no growth.
pub fn experience_delta(previous: Option<i64>, current: Option<i64>) -> i64 {
    match (previous, current) {
        (Some(previous), Some(current)) => current.saturating_sub(previous),
        _ => 0,
    }
}

fn classify_timeline(
    timeline: &[Observation],
    buckets: &LevelBuckets,
    out: &mut Vec<ClassifiedObservation>,
) {
    let mut previous: Option<&Observation> = None;

    for observation in timeline {
        let delta = previous
            .map(|prev| experience_delta(prev.experience, observation.experience))
            .unwrap_or(0);

        out.push(ClassifiedObservation {
            entity_id: observation.entity_id.clone(),
            observed_at: observation.observed_at,
            level: observation.level,
            experience: observation.experience,
            experience_delta: delta,
            activity_state: classify_state(previous.is_none(), delta),
            level_bucket: observation.level.and_then(|level| buckets.bucket_for(level)),
            guild_present: observation.guild_present,
        });

        previous = Some(observation);
    }
}

pub fn classify(observations: Vec<Observation>, buckets: &LevelBuckets) -> Classified {
    let (ordered, duplicates) = order_timelines(observations);

    for dup in duplicates.iter() {
        warn!(
            entity_id = %dup.entity_id,
            observed_at = %dup.observed_at,
            dropped = dup.dropped,
            "duplicate observation, keeping first occurrence"
        );
    }

    let mut rows = Vec::with_capacity(ordered.len());
    for timeline in entity_slices(&ordered) {
        classify_timeline(timeline, buckets, &mut rows);
    }

    Classified { rows, duplicates }
}

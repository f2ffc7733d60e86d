use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::activity::LevelBuckets;
use crate::aggregate;
use crate::models::{ActivityState, ActivityTrend};
use crate::pipeline::PipelineOutput;

/// Growing and stagnant counts for one snapshot date.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeeklyActivity {
    pub growing: usize,
    pub stagnant: usize,
    pub growing_pct: f64,
    pub stagnant_pct: f64,
}

pub fn summarize_weeks(trend: &[ActivityTrend]) -> BTreeMap<NaiveDate, WeeklyActivity> {
    let mut weeks: BTreeMap<NaiveDate, WeeklyActivity> = BTreeMap::new();

    for row in trend {
        let entry = weeks.entry(row.observed_at).or_default();
        match row.activity_state {
            ActivityState::Growing => {
                entry.growing = row.count;
                entry.growing_pct = row.percentage;
            }
            ActivityState::Stagnant => {
                entry.stagnant = row.count;
                entry.stagnant_pct = row.percentage;
            }
            ActivityState::FirstSeen => {}
        }
    }

    weeks
}

pub fn build_report(source: &str, output: &PipelineOutput, buckets: &LevelBuckets) -> String {
    let mut out = String::new();
    let weeks = summarize_weeks(&output.trend);
    let snapshot_dates: std::collections::BTreeSet<NaiveDate> = output
        .classified
        .iter()
        .map(|row| row.observed_at)
        .collect();

    let _ = writeln!(out, "# Cohort Activity Report");
    match (snapshot_dates.first(), snapshot_dates.last()) {
        (Some(first), Some(last)) => {
            let _ = writeln!(
                out,
                "Generated for {} ({} observations across {} snapshots, {} to {})",
                source,
                output.classified.len(),
                snapshot_dates.len(),
                first,
                last
            );
        }
        _ => {
            let _ = writeln!(out, "Generated for {} (no observations)", source);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Weekly Activity");

    if weeks.is_empty() {
        let _ = writeln!(out, "No follow-up snapshots to compare yet.");
    } else {
        for (date, week) in weeks.iter() {
            let _ = writeln!(
                out,
                "- {}: {:.1}% growing ({}), {:.1}% stagnant ({})",
                date, week.growing_pct, week.growing, week.stagnant_pct, week.stagnant
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Stagnation by Level");

    for bucket in buckets.all() {
        let observations: usize = output
            .stagnation
            .iter()
            .filter(|row| row.level_bucket == bucket)
            .map(|row| row.count)
            .sum();
        match aggregate::stagnation_rate(&output.stagnation, &bucket) {
            Some(rate) => {
                let _ = writeln!(
                    out,
                    "- {}: {:.1}% stagnant across {} observations",
                    bucket, rate, observations
                );
            }
            None => {
                let _ = writeln!(out, "- {}: no data", bucket);
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Latest Level Mix");

    match output.cohorts.iter().map(|row| row.observed_at).max() {
        Some(latest) => {
            let _ = writeln!(out, "Snapshot {}", latest);
            for row in output.cohorts.iter().filter(|row| row.observed_at == latest) {
                let _ = writeln!(
                    out,
                    "- {} {}: {:.1}% ({})",
                    row.activity_state, row.level_bucket, row.percentage, row.count
                );
            }
        }
        None => {
            let _ = writeln!(out, "No bucketed follow-up snapshots.");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Guild Growth");

    if output.guild_growth.is_empty() {
        let _ = writeln!(out, "No positive weekly gains recorded.");
    } else {
        for summary in output.guild_growth.iter() {
            let label = if summary.guild_present {
                "In guild"
            } else {
                "No guild"
            };
            let _ = writeln!(
                out,
                "- {}: {} gains, median {:.0} (q1 {:.0}, q3 {:.0}), mean {:.0}",
                label, summary.count, summary.median, summary.q1, summary.q3, summary.mean
            );
        }
    }

    let diagnostics = &output.diagnostics;
    let _ = writeln!(out);
    let _ = writeln!(out, "## Data Quality");
    let _ = writeln!(out, "- Rows read: {}", diagnostics.rows_read);
    let _ = writeln!(out, "- Excluded malformed rows: {}", diagnostics.excluded_rows());
    let _ = writeln!(out, "- Numeric fields treated as missing: {}", diagnostics.coerced_fields);
    let _ = writeln!(
        out,
        "- Duplicate observations dropped: {}",
        diagnostics.dropped_duplicates()
    );
    let _ = writeln!(out, "- Observations outside level range: {}", diagnostics.unbucketed);

    for row in diagnostics.malformed.iter().take(5) {
        let _ = writeln!(out, "  - line {}: {}", row.line, row.reason);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LevelRange, PipelineConfig};
    use crate::pipeline::run_reader;

    const SNAPSHOTS: &str = "\
ocid,date,character_level,character_exp,character_guild_name
E1,2025-01-01,260,1000,Maple
E1,2025-01-08,262,1500,Maple
E1,2025-01-15,262,1500,Maple
E2,2025-01-01,270,10,
E2,2025-01-08,271,10,
E2,2025-01-15,271,40,
";

    fn render() -> String {
        let output = run_reader(SNAPSHOTS.as_bytes(), &PipelineConfig::default()).unwrap();
        let buckets = LevelBuckets::new(LevelRange::default()).unwrap();
        build_report("growth_log.csv", &output, &buckets)
    }

    #[test]
    fn weekly_summary_pairs_states_per_date() {
        let output = run_reader(SNAPSHOTS.as_bytes(), &PipelineConfig::default()).unwrap();
        let weeks = summarize_weeks(&output.trend);
        let week_two = weeks[&NaiveDate::from_ymd_opt(2025, 1, 8).unwrap()];
        assert_eq!(week_two.growing, 1);
        assert_eq!(week_two.stagnant, 1);
        assert_eq!(week_two.growing_pct, 50.0);
    }

    #[test]
    fn report_lists_every_section() {
        let report = render();
        assert!(report.starts_with("# Cohort Activity Report"));
        assert!(report.contains("6 observations across 3 snapshots, 2025-01-01 to 2025-01-15"));
        assert!(report.contains("- 2025-01-08: 50.0% growing (1), 50.0% stagnant (1)"));
        assert!(report.contains("- 260~264: 50.0% stagnant across 2 observations"));
        assert!(report.contains("- 295~299: no data"));
        assert!(report.contains("Snapshot 2025-01-15"));
        assert!(report.contains("- In guild: 1 gains"));
        assert!(report.contains("- Duplicate observations dropped: 0"));
    }

    #[test]
    fn empty_input_still_renders() {
        let output = run_reader(
            "ocid,date,character_level,character_exp\n".as_bytes(),
            &PipelineConfig::default(),
        )
        .unwrap();
        let buckets = LevelBuckets::new(LevelRange::default()).unwrap();
        let report = build_report("empty.csv", &output, &buckets);
        assert!(report.contains("Generated for empty.csv (no observations)"));
        assert!(report.contains("No follow-up snapshots to compare yet."));
        assert!(report.contains("No positive weekly gains recorded."));
    }
}

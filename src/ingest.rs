use std::io;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info, warn};

use crate::config::{MalformedRowPolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::models::{MalformedRow, Observation};

/// Typed observations in input order plus what was rejected on the way.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub observations: Vec<Observation>,
    pub rows_read: usize,
    pub malformed: Vec<MalformedRow>,
    pub coerced_fields: usize,
}

struct ColumnIndex {
    entity_id: usize,
    date: usize,
    level: usize,
    experience: usize,
    guild_name: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, config: &PipelineConfig) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|header| header == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| PipelineError::MissingField {
                column: name.to_string(),
            })
        };

        let columns = &config.columns;
        let index = ColumnIndex {
            entity_id: require(columns.entity_id.as_str())?,
            date: require(columns.date.as_str())?,
            level: require(columns.level.as_str())?,
            experience: require(columns.experience.as_str())?,
            guild_name: find(columns.guild_name.as_str()),
        };

        if index.guild_name.is_none() {
            warn!(
                column = %columns.guild_name,
                "guild column absent, treating every observation as guildless"
            );
        }

        Ok(index)
    }
}

enum Numeric<T> {
    Blank,
    Value(T),
    Invalid,
}

impl<T> Numeric<T> {
    fn into_option(self, coerced: &mut usize) -> Option<T> {
        match self {
            Numeric::Value(value) => Some(value),
            Numeric::Blank => None,
            Numeric::Invalid => {
                *coerced += 1;
                None
            }
        }
    }
}

pub fn load_observations(path: &Path, config: &PipelineConfig) -> Result<Ingested> {
    let file = std::fs::File::open(path)?;
    let ingested = read_observations(io::BufReader::new(file), config)?;
    info!(
        path = %path.display(),
        rows = ingested.rows_read,
        observations = ingested.observations.len(),
        excluded = ingested.malformed.len(),
        "loaded snapshot file"
    );
    Ok(ingested)
}

pub fn read_observations<R: io::Read>(reader: R, config: &PipelineConfig) -> Result<Ingested> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let columns = ColumnIndex::resolve(&headers, config)?;

    let mut ingested = Ingested::default();

    for result in reader.byte_records() {
        let record = result?;
        ingested.rows_read += 1;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        match parse_row(&record, &columns, &mut ingested.coerced_fields) {
            Ok(observation) => ingested.observations.push(observation),
            Err(reason) => {
                if config.malformed_rows == MalformedRowPolicy::Strict {
                    return Err(PipelineError::MalformedRow { line, reason });
                }
                debug!(line, %reason, "excluding malformed row");
                ingested.malformed.push(MalformedRow { line, reason });
            }
        }
    }

    check_exclusion_rate(&ingested, config.max_malformed_ratio)?;

    if !ingested.malformed.is_empty() {
        warn!(
            excluded = ingested.malformed.len(),
            rows = ingested.rows_read,
            "excluded malformed rows"
        );
    }
    if ingested.coerced_fields > 0 {
        warn!(
            fields = ingested.coerced_fields,
            "non-numeric level/experience values treated as missing"
        );
    }

    Ok(ingested)
}

fn parse_row(
    record: &ByteRecord,
    columns: &ColumnIndex,
    coerced: &mut usize,
) -> std::result::Result<Observation, String> {
    // Only the mapped columns are decoded; stray bytes elsewhere are ignored.
    let field = move |index: usize| -> std::result::Result<&str, String> {
        let bytes = record.get(index).unwrap_or_default();
        std::str::from_utf8(bytes).map_err(|_| format!("invalid utf-8 in field {}", index + 1))
    };

    let entity_id = field(columns.entity_id)?;
    if entity_id.is_empty() {
        return Err("blank entity id".to_string());
    }

    let raw_date = field(columns.date)?;
    let observed_at =
        parse_date(raw_date).ok_or_else(|| format!("unparsable date {raw_date:?}"))?;

    let level = match parse_integral(field(columns.level)?) {
        Numeric::Value(value) => match i32::try_from(value) {
            Ok(level) => Numeric::Value(level),
            Err(_) => Numeric::Invalid,
        },
        Numeric::Blank => Numeric::Blank,
        Numeric::Invalid => Numeric::Invalid,
    }
    .into_option(coerced);
    let experience = parse_integral(field(columns.experience)?).into_option(coerced);

    let guild_present = match columns.guild_name {
        Some(index) => !field(index)?.is_empty(),
        None => false,
    };

    Ok(Observation {
        entity_id: entity_id.to_string(),
        observed_at,
        level,
        experience,
        guild_present,
    })
}

fn check_exclusion_rate(ingested: &Ingested, max_ratio: f64) -> Result<()> {
    if ingested.rows_read == 0 {
        return Ok(());
    }
    let excluded = ingested.malformed.len();
    let ratio = excluded as f64 / ingested.rows_read as f64;
    if ratio > max_ratio {
        return Err(PipelineError::ExclusionThresholdExceeded {
            excluded,
            total: ingested.rows_read,
            max_ratio,
        });
    }
    Ok(())
}

/// Accepts plain dates, naive date-times and RFC 3339 timestamps; keeps the date part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(datetime.date());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|datetime| datetime.date_naive())
}

fn parse_integral(raw: &str) -> Numeric<i64> {
    if raw.is_empty() {
        return Numeric::Blank;
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Numeric::Value(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_nan() => Numeric::Blank,
        Ok(value)
            if value.is_finite()
                && value.fract() == 0.0
                && value >= i64::MIN as f64
                && value <= i64::MAX as f64 =>
        {
            Numeric::Value(value as i64)
        }
        _ => Numeric::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ocid,date,character_level,character_exp,character_guild_name,character_name\n";

    fn ingest(body: &str) -> Result<Ingested> {
        let input = format!("{HEADER}{body}");
        read_observations(input.as_bytes(), &PipelineConfig::default())
    }

    #[test]
    fn parses_typed_fields_and_guild_flag() {
        let ingested = ingest("E1,2025-01-01,260,1000,Maple,Hero\nE2,2025-01-01,275,,,\n").unwrap();

        assert_eq!(ingested.rows_read, 2);
        assert_eq!(ingested.observations.len(), 2);
        let first = &ingested.observations[0];
        assert_eq!(first.entity_id, "E1");
        assert_eq!(first.observed_at, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(first.level, Some(260));
        assert_eq!(first.experience, Some(1000));
        assert!(first.guild_present);

        let second = &ingested.observations[1];
        assert_eq!(second.experience, None);
        assert!(!second.guild_present);
        assert_eq!(ingested.coerced_fields, 0);
    }

    #[test]
    fn non_numeric_values_become_missing_not_zero() {
        let ingested = ingest("E1,2025-01-01,abc,n/a,,\nE1,2025-01-08,262.0,1.5e3,,\n").unwrap();

        assert_eq!(ingested.observations[0].level, None);
        assert_eq!(ingested.observations[0].experience, None);
        assert_eq!(ingested.observations[1].level, Some(262));
        assert_eq!(ingested.observations[1].experience, Some(1500));
        assert_eq!(ingested.coerced_fields, 2);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let input = "ocid,date,character_level\nE1,2025-01-01,260\n";
        let err = read_observations(input.as_bytes(), &PipelineConfig::default()).unwrap_err();
        match err {
            PipelineError::MissingField { column } => assert_eq!(column, "character_exp"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn guild_column_is_optional() {
        let input = "ocid,date,character_level,character_exp\nE1,2025-01-01,260,10\n";
        let ingested = read_observations(input.as_bytes(), &PipelineConfig::default()).unwrap();
        assert!(!ingested.observations[0].guild_present);
    }

    #[test]
    fn malformed_rows_are_excluded_and_reported() {
        let mut body = String::new();
        for week in 1..=9 {
            body.push_str(&format!("E1,2025-01-0{week},260,{week}00,,\n"));
        }
        body.push_str("E1,not-a-date,260,1000,,\n");

        let ingested = ingest(&body).unwrap();
        assert_eq!(ingested.rows_read, 10);
        assert_eq!(ingested.observations.len(), 9);
        assert_eq!(ingested.malformed.len(), 1);
        assert_eq!(ingested.malformed[0].line, 11);
        assert!(ingested.malformed[0].reason.contains("not-a-date"));
    }

    #[test]
    fn undecodable_row_is_excluded_like_other_malformed_rows() {
        let mut input = HEADER.as_bytes().to_vec();
        for week in 1..=9 {
            input.extend_from_slice(format!("E1,2025-01-0{week},260,{week}00,,\n").as_bytes());
        }
        input.extend_from_slice(b"E2,2025-01-01,260,100,\xff\xfe,\n");

        let ingested = read_observations(input.as_slice(), &PipelineConfig::default()).unwrap();
        assert_eq!(ingested.rows_read, 10);
        assert_eq!(ingested.observations.len(), 9);
        assert_eq!(ingested.malformed.len(), 1);
        assert_eq!(ingested.malformed[0].line, 11);
        assert!(ingested.malformed[0].reason.contains("utf-8"));
    }

    #[test]
    fn undecodable_row_fails_strict_runs() {
        let config = PipelineConfig {
            malformed_rows: MalformedRowPolicy::Strict,
            ..PipelineConfig::default()
        };
        let mut input = HEADER.as_bytes().to_vec();
        input.extend_from_slice(b"E\xff1,2025-01-01,260,100,,\n");
        let err = read_observations(input.as_slice(), &config).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn stray_bytes_in_unmapped_columns_are_ignored() {
        let mut input = HEADER.as_bytes().to_vec();
        input.extend_from_slice(b"E1,2025-01-01,260,100,Maple,\xff\n");
        let ingested = read_observations(input.as_slice(), &PipelineConfig::default()).unwrap();
        assert_eq!(ingested.observations.len(), 1);
        assert!(ingested.malformed.is_empty());
    }

    #[test]
    fn exclusion_rate_equal_to_threshold_passes() {
        let ingested = Ingested {
            rows_read: 10,
            malformed: vec![MalformedRow {
                line: 2,
                reason: "unparsable date".to_string(),
            }],
            ..Ingested::default()
        };
        assert!(check_exclusion_rate(&ingested, 0.10).is_ok());

        let ingested = Ingested {
            rows_read: 9,
            ..ingested
        };
        assert!(matches!(
            check_exclusion_rate(&ingested, 0.10),
            Err(PipelineError::ExclusionThresholdExceeded {
                excluded: 1,
                total: 9,
                ..
            })
        ));
    }

    #[test]
    fn exclusion_rate_above_threshold_fails_the_run() {
        let err = ingest("E1,2025-01-01,260,1000,,\n,2025-01-08,260,1000,,\n").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ExclusionThresholdExceeded {
                excluded: 1,
                total: 2,
                ..
            }
        ));
    }

    #[test]
    fn strict_policy_fails_on_first_malformed_row() {
        let config = PipelineConfig {
            malformed_rows: MalformedRowPolicy::Strict,
            ..PipelineConfig::default()
        };
        let input = format!("{HEADER}E1,2025-13-40,260,1000,,\n");
        let err = read_observations(input.as_bytes(), &config).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn accepts_timestamp_dates() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 8);
        assert_eq!(parse_date("2025-01-08"), expected);
        assert_eq!(parse_date("2025-01-08 00:00:00"), expected);
        assert_eq!(parse_date("2025-01-08T12:30:00.250"), expected);
        assert_eq!(parse_date("2025-01-08T09:00:00+09:00"), expected);
        assert_eq!(parse_date("08/01/2025"), None);
    }
}

use std::io::{self, Write};
use std::path::Path;

use clap::ValueEnum;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Csv,
    Json,
}

pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<W: Write, T: Serialize>(mut writer: W, rows: &[T]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writeln!(writer)?;
    Ok(())
}

pub fn write_table<W: Write, T: Serialize>(writer: W, rows: &[T], format: Format) -> Result<()> {
    match format {
        Format::Csv => write_csv(writer, rows),
        Format::Json => write_json(writer, rows),
    }
}

/// Writes to `out` when given, otherwise to stdout.
pub fn emit<T: Serialize>(rows: &[T], format: Format, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            write_table(io::BufWriter::new(file), rows, format)
        }
        None => write_table(io::stdout().lock(), rows, format),
    }
}

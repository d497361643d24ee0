//! Text renderings of coverage data
//!
//! ```text
//! Name                              Lines  Hit lines
//! ---------------------------------------------------
//! coordinator/src/suite/cases.rs        4  12-14, 31
//! ---------------------------------------------------
//! TOTAL                                 4
//! ```

use std::collections::BTreeSet;
use std::io::{self, Write};

use super::data::CoverageData;
use crate::line_cache::LineCache;

/// Collapse sorted line numbers into `a-b` ranges
pub fn format_ranges(lines: &BTreeSet<u32>) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match ranges.last_mut() {
            Some((_, end)) if line == *end + 1 => *end = line,
            _ => ranges.push((line, line)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn write_summary(data: &CoverageData, dest: &mut dyn Write) -> io::Result<()> {
    let name_width = data
        .files()
        .map(|(file, _)| file.len())
        .max()
        .unwrap_or(0)
        .max("TOTAL".len())
        .max("Name".len());
    let rule = "-".repeat(name_width + 20);

    writeln!(dest, "{:<name_width$}  {:>5}  Hit lines", "Name", "Lines")?;
    writeln!(dest, "{rule}")?;
    for (file, lines) in data.files() {
        writeln!(dest, "{:<name_width$}  {:>5}  {}", file, lines.len(), format_ranges(lines))?;
    }
    writeln!(dest, "{rule}")?;
    writeln!(dest, "{:<name_width$}  {:>5}", "TOTAL", data.line_count())?;
    Ok(())
}

/// Every covered file with a `>` marker on hit lines
///
/// Files the cache cannot read are listed with a note instead of their text.
pub fn write_annotated(data: &CoverageData, cache: &LineCache, dest: &mut dyn Write) -> io::Result<()> {
    for (file, hit) in data.files() {
        writeln!(dest, "=== {file}")?;
        let Some(lines) = cache.lines(file) else {
            writeln!(dest, "  (source unavailable)")?;
            continue;
        };

        for (index, text) in lines.iter().enumerate() {
            let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let marker = if hit.contains(&number) { '>' } else { ' ' };
            writeln!(dest, "{marker} {number:>4}  {text}")?;
        }
    }
    Ok(())
}

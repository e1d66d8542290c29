//! Delimited-text reading and writing for the bulk import/export paths.
//!
//! The reader never fails. An unmatched quote swallows the rest of the input
//! as literal field content, and the row validators downstream report
//! whatever that produces.

use crate::error::{AppError, AppResult};
use ::csv::{QuoteStyle, Terminator};

const CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

/// Pick the delimiter with the highest count in the first non-blank line.
/// Ties for the top count and lines with no candidates fall back to comma.
pub fn detect_delimiter(text: &str) -> char {
    let first = strip_bom(text)
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let counts: Vec<(char, usize)> = CANDIDATES
        .iter()
        .map(|&c| (c, first.chars().filter(|&ch| ch == c).count()))
        .collect();
    let max = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if max == 0 {
        return ',';
    }
    let mut leaders = counts.iter().filter(|(_, n)| *n == max);
    match (leaders.next(), leaders.next()) {
        (Some((c, _)), None) => *c,
        _ => ',',
    }
}

/// Parse with an auto-detected delimiter.
pub fn parse(text: &str) -> Vec<Vec<String>> {
    parse_with(text, detect_delimiter(text))
}

pub fn parse_with(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(strip_bom(text).as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.byte_records() {
        match record {
            Ok(record) => rows.push(
                record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!("Stopped reading CSV at an unreadable record: {}", e);
                break;
            }
        }
    }

    while rows.last().is_some_and(|r| is_blank_row(r)) {
        rows.pop();
    }
    rows
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|f| f.trim().is_empty())
}

/// Serialize rows with CRLF line endings and a trailing newline. A field is
/// quoted only when it holds the delimiter, a quote, CR or LF.
pub fn to_csv<S: AsRef<str>>(rows: &[Vec<S>], delimiter: char) -> AppResult<String> {
    let mut writer = ::csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::CRLF)
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .write_record(row.iter().map(AsRef::<str>::as_ref))
            .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))
}

/// A single row without the line terminator.
pub fn write_row<S: AsRef<str>>(fields: &[S], delimiter: char) -> AppResult<String> {
    let row: Vec<&str> = fields.iter().map(|f| f.as_ref()).collect();
    let text = to_csv(&[row], delimiter)?;
    Ok(text.trim_end_matches("\r\n").to_string())
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

// src/store/format.rs

//! The line-oriented durable file format.
//!
//! A tasks file mixes freeform preserved lines (blank, `#`-prefixed, or
//! starting with whitespace) with CSV data rows. Preserved lines are kept
//! verbatim in their original order so that a load/persist cycle is lossless.
//! Data rows are quoted CSV, every field quoted and `\n` terminated, so a
//! row is always exactly one line.

use crate::errors::{QrunError, Result};
use crate::store::task::{FIELD_NAMES, ROWNUM_FIELD, Task};

/// Documentation block seeded into freshly created stores.
pub const DEFAULT_PRESERVED_TEXT: &str = "\
# qrun tasks file.
#
# Statuses:
#   (blank), IGNORE: skip over this row
#   NEW:       queued, not yet running
#   LAUNCHING: the runner is about to start the task
#   RUNNING:   the task is running; the pid field is valid
#   FINISHED:  the task has finished; the rc field is valid
#   ARCHIVING: input/output files and rc are being archived
#   DELETE:    input/output files are ready to be deleted
#   DELETED:   finished and ready to drop this row (same as IGNORE)
#   INVALID:   the row could not be understood
#   FAILED:    the runner was unable to launch the task
#   DIED:      the process exited while the runner was not watching
#   ZOMBIE:    the process survived SIGKILL; the pid field is valid
#   EXCEPTION: the runner hit an internal error; see the exception field
#   KILLING, KILLING9: a kill was requested and is in progress
#   KILLED, KILLED9:   the task was killed (rc is not valid after KILLED9)
#   LOST:      the runner stopped and the task kept running
#
# Groups: rows with a blank, zero or negative group may run at any time and
# in parallel with each other. Every row in group N must reach a final
# status before any row in a higher-numbered group starts.
#
# Stdio: blank file names get names derived from group, row number and
# comment; a missing input file reads as empty input; the special name
# `-` means the runner's own stream.
";

/// A tasks file split into its preserved lines, header and parsed rows.
#[derive(Debug)]
pub struct ParsedFile {
    pub preserved: Vec<String>,
    pub header: Vec<String>,
    pub rows: Vec<Task>,
}

/// Parse the full text of a tasks file.
///
/// The first data row is an explicit header iff its first field reads
/// `comment` (case-insensitively); otherwise the canonical header is
/// assumed. Declaring the derived `rownum` column in an explicit header is
/// a hard error.
pub fn parse(text: &str) -> Result<ParsedFile> {
    let (preserved, data) = split_lines(text);
    if data.is_empty() {
        return Ok(ParsedFile {
            preserved,
            header: default_header(),
            rows: Vec::new(),
        });
    }

    let first = parse_record(&data[0])?;
    let (header, body) = if first
        .first()
        .is_some_and(|f| f.eq_ignore_ascii_case("comment"))
    {
        (validate_header(first)?, &data[1..])
    } else {
        (default_header(), &data[..])
    };

    let mut rows = Vec::with_capacity(body.len());
    for (rownum, line) in body.iter().enumerate() {
        let record = parse_record(line)?;
        let mut task = Task {
            rownum,
            ..Task::default()
        };
        // Missing trailing fields are treated as blank; cells beyond the
        // header are ignored.
        for (name, value) in header.iter().zip(record.iter()) {
            if !value.is_empty() {
                task.set_field(name, value)?;
            }
        }
        rows.push(task);
    }

    Ok(ParsedFile {
        preserved,
        header,
        rows,
    })
}

/// The canonical header, as owned strings.
pub fn default_header() -> Vec<String> {
    FIELD_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Split text into preserved lines and data lines, in order.
pub fn split_lines(text: &str) -> (Vec<String>, Vec<String>) {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = normalized.split('\n').collect();
    // A trailing newline produces one empty artifact, not a preserved line.
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut preserved = Vec::new();
    let mut data = Vec::new();
    for line in lines {
        let is_preserved = line
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == '#');
        if is_preserved {
            preserved.push(line.to_string());
        } else {
            data.push(line.to_string());
        }
    }
    (preserved, data)
}

fn validate_header(fields: Vec<String>) -> Result<Vec<String>> {
    let mut header = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field.trim().to_ascii_lowercase();
        if name == ROWNUM_FIELD {
            return Err(QrunError::Config(
                "`rownum` is not a valid field in the header; it is derived from row order".into(),
            ));
        }
        if !FIELD_NAMES.contains(&name.as_str()) {
            return Err(QrunError::Config(format!("unknown field `{name}` in header")));
        }
        header.push(name);
    }
    Ok(header)
}

/// Parse one CSV line into its fields.
fn parse_record(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(record.iter().map(|s| s.to_string()).collect())
    } else {
        Ok(Vec::new())
    }
}

/// Serialize one task as a CSV row in the given header order, excluding the
/// derived `rownum` and the in-process payload. Includes the terminating
/// newline.
pub fn serialize_row(task: &Task, header: &[String]) -> Result<String> {
    let mut fields = Vec::with_capacity(header.len());
    for name in header {
        fields.push(task.field(name)?);
    }
    write_record(&fields)
}

/// Serialize the whole store: preserved lines, then the header row, then
/// every data row.
pub fn serialize_store(preserved: &[String], header: &[String], rows: &[Task]) -> Result<String> {
    let mut out = String::new();
    for line in preserved {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&write_record(header)?);
    for task in rows {
        out.push_str(&serialize_row(task, header)?);
    }
    Ok(out)
}

fn write_record(fields: &[String]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let buf = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV row: {e}"))?;
    String::from_utf8(buf).map_err(|e| QrunError::Other(anyhow::anyhow!("CSV row is not UTF-8: {e}")))
}

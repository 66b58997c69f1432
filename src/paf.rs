//! PAF/MHAP overlap intake.
//!
//! This module provides streaming parsers for pairwise overlap files.
//! Supports both uncompressed and gzip-compressed files, detected by file
//! extension.

use crate::overlap::{ExternalIds, Overlap, Strand};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Error as IoError};
use std::num::{ParseFloatError, ParseIntError};

#[derive(Debug)]
pub enum ParseErr {
    NotEnoughFields,
    IoError(IoError),
    InvalidField(ParseIntError),
    InvalidFloatField(ParseFloatError),
    InvalidStrand,
    InvalidFormat(String),
}

impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErr::NotEnoughFields => write!(f, "Not enough fields in overlap record"),
            ParseErr::IoError(e) => write!(f, "IO error: {}", e),
            ParseErr::InvalidField(e) => write!(f, "Invalid field: {}", e),
            ParseErr::InvalidFloatField(e) => write!(f, "Invalid field: {}", e),
            ParseErr::InvalidStrand => write!(f, "Invalid strand"),
            ParseErr::InvalidFormat(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseErr {}

impl From<ParseErr> for IoError {
    fn from(e: ParseErr) -> Self {
        match e {
            ParseErr::IoError(e) => e,
            other => IoError::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Format {
    Paf,
    Mhap,
}

fn detect_format(path: &str) -> Option<Format> {
    let stem = path.strip_suffix(".gz").unwrap_or(path);
    if stem.ends_with(".paf") {
        Some(Format::Paf)
    } else if stem.ends_with(".mhap") {
        Some(Format::Mhap)
    } else {
        None
    }
}

/// Parse a single PAF line into an Overlap.
///
/// PAF carries no error estimate, so it is derived from the span
/// asymmetry: `1 - min(spans) / max(spans)`; the overlap length is the
/// longer span.
fn parse_paf_line(line: &str) -> Result<Overlap, ParseErr> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 12 {
        return Err(ParseErr::NotEnoughFields);
    }

    let query_name = fields[0].to_string();
    let query_length = fields[1].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let query_start = fields[2].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let query_end = fields[3].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let strand = match fields[4] {
        "+" => Strand::Forward,
        "-" => Strand::Reverse,
        _ => return Err(ParseErr::InvalidStrand),
    };
    let target_name = fields[5].to_string();
    let target_length = fields[6].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let target_start = fields[7].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let target_end = fields[8].parse::<u32>().map_err(ParseErr::InvalidField)?;

    let query_span = query_end.saturating_sub(query_start);
    let target_span = target_end.saturating_sub(target_start);
    let length = query_span.max(target_span);
    let error = if length == 0 {
        1.0
    } else {
        1.0 - query_span.min(target_span) as f64 / length as f64
    };

    Ok(Overlap::new(
        ExternalIds::Names {
            query: query_name,
            target: target_name,
        },
        strand,
        query_start,
        query_end,
        query_length,
        target_start,
        target_end,
        target_length,
        error,
        length,
    ))
}

/// Parse a single MHAP line into an Overlap.
///
/// MHAP is space-separated with 1-based ordinal sequence ids and an
/// explicit error column. Ids are normalized to 0-based appearance
/// order; a reverse-oriented query has its coordinates flipped into
/// forward space and the record strand is the XOR of the two orientation
/// columns.
fn parse_mhap_line(line: &str) -> Result<Overlap, ParseErr> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.len() < 12 {
        return Err(ParseErr::NotEnoughFields);
    }

    let query_id = fields[0]
        .parse::<u64>()
        .map_err(ParseErr::InvalidField)?
        .saturating_sub(1);
    let target_id = fields[1]
        .parse::<u64>()
        .map_err(ParseErr::InvalidField)?
        .saturating_sub(1);
    let error = fields[2]
        .parse::<f64>()
        .map_err(ParseErr::InvalidFloatField)?;
    let query_rc = parse_orientation(fields[4])?;
    let mut query_start = fields[5].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let mut query_end = fields[6].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let query_length = fields[7].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let target_rc = parse_orientation(fields[8])?;
    let target_start = fields[9].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let target_end = fields[10].parse::<u32>().map_err(ParseErr::InvalidField)?;
    let target_length = fields[11].parse::<u32>().map_err(ParseErr::InvalidField)?;

    if query_rc {
        let begin = query_length.saturating_sub(query_end);
        query_end = query_length.saturating_sub(query_start);
        query_start = begin;
    }
    let strand = if query_rc != target_rc {
        Strand::Reverse
    } else {
        Strand::Forward
    };
    let length = (query_end - query_start).max(target_end.saturating_sub(target_start));

    Ok(Overlap::new(
        ExternalIds::Ids {
            query: query_id,
            target: target_id,
        },
        strand,
        query_start,
        query_end,
        query_length,
        target_start,
        target_end,
        target_length,
        error,
        length,
    ))
}

fn parse_orientation(field: &str) -> Result<bool, ParseErr> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ParseErr::InvalidStrand),
    }
}

/// Streaming PAF/MHAP reader; the format is chosen from the file
/// extension and an unsupported extension is rejected at construction.
pub struct OverlapReader {
    reader: Box<dyn BufRead>,
    format: Format,
    line: String,
}

impl std::fmt::Debug for OverlapReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapReader")
            .field("format", &self.format)
            .field("line", &self.line)
            .finish()
    }
}

impl OverlapReader {
    pub fn from_path(path: &str) -> std::io::Result<Self> {
        let format = detect_format(path).ok_or_else(|| {
            IoError::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "file {} has unsupported format extension (valid extensions: \
                     .mhap, .mhap.gz, .paf, .paf.gz)",
                    path
                ),
            )
        })?;
        let file = File::open(path)?;
        let reader: Box<dyn BufRead> = if path.ends_with(".gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(OverlapReader {
            reader,
            format,
            line: String::new(),
        })
    }

    /// Appends records until roughly `max_bytes` of record text has been
    /// consumed; returns `true` while the stream has more records.
    pub fn read_chunk(
        &mut self,
        dst: &mut Vec<Option<Overlap>>,
        max_bytes: u64,
    ) -> std::io::Result<bool> {
        let mut bytes: u64 = 0;
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(ParseErr::IoError)?;
            if read == 0 {
                return Ok(false);
            }
            let line = self.line.trim_end_matches(&['\n', '\r'][..]);
            if line.is_empty() {
                continue;
            }
            let overlap = match self.format {
                Format::Paf => parse_paf_line(line)?,
                Format::Mhap => parse_mhap_line(line)?,
            };
            dst.push(Some(overlap));
            bytes = bytes.saturating_add(read as u64);
            if bytes >= max_bytes {
                return Ok(true);
            }
        }
    }
}

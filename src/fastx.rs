//! FASTA/FASTQ sequence intake.
//!
//! Hand-parsed streaming readers for plain or gzip-compressed sequence
//! files. Records are pulled in bounded chunks so the polisher never holds
//! more than one batch of raw query data at a time.

use crate::sequence::Sequence;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Error as IoError};

#[derive(Debug)]
pub enum ParseErr {
    IoError(IoError),
    MissingHeader(String),
    EmptyName(u64),
    EmptySequence(String),
    QualityLengthMismatch(String),
    InvalidFormat(String),
}

impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErr::IoError(e) => write!(f, "IO error: {}", e),
            ParseErr::MissingHeader(line) => {
                write!(f, "Expected record header, found '{}'", line)
            }
            ParseErr::EmptyName(line_num) => {
                write!(f, "Record at line {} has an empty name", line_num)
            }
            ParseErr::EmptySequence(name) => write!(f, "Record '{}' has no sequence data", name),
            ParseErr::QualityLengthMismatch(name) => {
                write!(f, "Record '{}' has unequal sequence and quality lengths", name)
            }
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
    Fasta,
    Fastq,
}

fn detect_format(path: &str) -> Option<Format> {
    let stem = path.strip_suffix(".gz").unwrap_or(path);
    if [".fasta", ".fa"].iter().any(|e| stem.ends_with(e)) {
        Some(Format::Fasta)
    } else if [".fastq", ".fq"].iter().any(|e| stem.ends_with(e)) {
        Some(Format::Fastq)
    } else {
        None
    }
}

fn open_reader(path: &str) -> std::io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streaming FASTA/FASTQ reader. The format is chosen from the file
/// extension; an unsupported extension is rejected at construction.
pub struct FastxReader {
    reader: Box<dyn BufRead>,
    format: Format,
    // FASTA headers are only recognized once the previous record's data
    // has been consumed, so the lookahead line is carried here.
    pending_header: Option<String>,
    line_num: u64,
}

impl std::fmt::Debug for FastxReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastxReader")
            .field("format", &self.format)
            .field("pending_header", &self.pending_header)
            .field("line_num", &self.line_num)
            .finish()
    }
}

impl FastxReader {
    pub fn from_path(path: &str) -> std::io::Result<Self> {
        let format = detect_format(path).ok_or_else(|| {
            IoError::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "file {} has unsupported format extension (valid extensions: \
                     .fasta, .fasta.gz, .fa, .fa.gz, .fastq, .fastq.gz, .fq, .fq.gz)",
                    path
                ),
            )
        })?;
        Ok(FastxReader {
            reader: open_reader(path)?,
            format,
            pending_header: None,
            line_num: 0,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>, ParseErr> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(ParseErr::IoError)?;
        if read == 0 {
            return Ok(None);
        }
        self.line_num += 1;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn parse_name(header: &str, line_num: u64) -> Result<String, ParseErr> {
        let name = header[1..].split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err(ParseErr::EmptyName(line_num));
        }
        Ok(name.to_string())
    }

    fn next_record(&mut self) -> Result<Option<Sequence>, ParseErr> {
        match self.format {
            Format::Fasta => self.next_fasta_record(),
            Format::Fastq => self.next_fastq_record(),
        }
    }

    fn next_fasta_record(&mut self) -> Result<Option<Sequence>, ParseErr> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => loop {
                match self.next_line()? {
                    Some(line) if line.is_empty() => continue,
                    Some(line) if line.starts_with('>') => break line,
                    Some(line) => return Err(ParseErr::MissingHeader(line)),
                    None => return Ok(None),
                }
            },
        };
        let name = Self::parse_name(&header, self.line_num)?;

        let mut data = Vec::new();
        loop {
            match self.next_line()? {
                Some(line) if line.starts_with('>') => {
                    self.pending_header = Some(line);
                    break;
                }
                Some(line) => data.extend_from_slice(line.as_bytes()),
                None => break,
            }
        }
        if data.is_empty() {
            return Err(ParseErr::EmptySequence(name));
        }
        Ok(Some(Sequence::new(name, data, Vec::new())))
    }

    fn next_fastq_record(&mut self) -> Result<Option<Sequence>, ParseErr> {
        let header = loop {
            match self.next_line()? {
                Some(line) if line.is_empty() => continue,
                Some(line) if line.starts_with('@') => break line,
                Some(line) => return Err(ParseErr::MissingHeader(line)),
                None => return Ok(None),
            }
        };
        let name = Self::parse_name(&header, self.line_num)?;

        let data = self
            .next_line()?
            .ok_or_else(|| ParseErr::EmptySequence(name.clone()))?;
        let separator = self
            .next_line()?
            .ok_or_else(|| ParseErr::InvalidFormat(format!("Record '{}' is truncated", name)))?;
        if !separator.starts_with('+') {
            return Err(ParseErr::InvalidFormat(format!(
                "Record '{}' is missing the '+' separator",
                name
            )));
        }
        let quality = self
            .next_line()?
            .ok_or_else(|| ParseErr::InvalidFormat(format!("Record '{}' is truncated", name)))?;
        if data.is_empty() {
            return Err(ParseErr::EmptySequence(name));
        }
        if data.len() != quality.len() {
            return Err(ParseErr::QualityLengthMismatch(name));
        }
        Ok(Some(Sequence::new(
            name,
            data.into_bytes(),
            quality.into_bytes(),
        )))
    }

    /// Appends records until roughly `max_bytes` of sequence data have
    /// been gathered; returns `true` while the stream has more records.
    pub fn read_chunk(
        &mut self,
        dst: &mut Vec<Option<Sequence>>,
        max_bytes: u64,
    ) -> std::io::Result<bool> {
        let mut bytes: u64 = 0;
        loop {
            match self.next_record()? {
                Some(sequence) => {
                    bytes = bytes.saturating_add(sequence.data().len() as u64);
                    dst.push(Some(sequence));
                    if bytes >= max_bytes {
                        return Ok(true);
                    }
                }
                None => return Ok(false),
            }
        }
    }
}

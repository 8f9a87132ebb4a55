//! Incremental decoding of the live scan-result stream.
//!
//! The external scanner reports results as an append-only text file: one
//! whitespace-delimited row of decimal tokens per record, a literal
//! completion sentinel at the end, and (a quirk of the upstream producer) an
//! unused leading `0.000000` calibration token on each data line. The
//! [`StreamCursor`] tails that file while the producer is still writing,
//! consuming only complete lines, and reports a completion fraction per
//! poll. Decoding is idempotent up to the data available: polling a longer
//! stream strictly extends the rows decoded so far.
//!
//! All data lines must carry the same token count `k`, the grid edge length
//! must be an integer multiple of `k`, and the final grid is formed by
//! concatenating `edge / k` consecutive lines per row.

use crate::error::{ScanError, ScanResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Literal line marking the end of the stream. Filtered, never parsed.
pub const COMPLETION_SENTINEL: &str = "2D Voltage Scan Completed.";

/// Leading placeholder tokens the producer prefixes to each data line.
const DUMMY_TOKENS: [&str; 2] = ["0.000000", ".000000"];

/// Completion snapshot published on every poll tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScanProgress {
    /// Valid data lines decoded so far
    pub decoded_lines: usize,
    /// Total lines the stream will contain, once known
    pub expected_lines: Option<usize>,
    /// `decoded / expected`, clamped to 1.0; 0.0 until the first valid line
    pub fraction: f64,
}

/// Parse state over the live result stream.
///
/// Owns a byte offset into the stream file and the rows decoded so far;
/// discarded once the stream is fully decoded or the scan is abandoned.
#[derive(Debug)]
pub struct StreamCursor {
    pixels: usize,
    offset: u64,
    carry: String,
    lines: Vec<Vec<f64>>,
    tokens_per_line: Option<usize>,
    expected_lines: Option<usize>,
}

impl StreamCursor {
    /// Cursor for a scan with `pixels` rows and columns.
    pub fn new(pixels: usize) -> Self {
        Self {
            pixels,
            offset: 0,
            carry: String::new(),
            lines: Vec::new(),
            tokens_per_line: None,
            expected_lines: None,
        }
    }

    /// Read newly appended bytes from `path` and decode any complete lines.
    ///
    /// The stream file not existing yet is not an error: the producer may
    /// not have created it. Only the monotonically growing prefix is read;
    /// the producer is never blocked or locked against.
    pub fn poll_file(&mut self, path: &Path) -> ScanResult<ScanProgress> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(self.progress()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = String::new();
        let read = file.read_to_string(&mut chunk)?;
        self.offset += read as u64;
        self.feed(&chunk)?;
        Ok(self.progress())
    }

    /// Decode complete lines from `chunk`; a trailing partial line is held
    /// back until the rest of it arrives.
    pub fn feed(&mut self, chunk: &str) -> ScanResult<()> {
        self.carry.push_str(chunk);
        while let Some(newline) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=newline).collect();
            self.decode_line(line.trim())?;
        }
        Ok(())
    }

    fn decode_line(&mut self, line: &str) -> ScanResult<()> {
        if line.is_empty() || line == COMPLETION_SENTINEL {
            return Ok(());
        }
        let mut tokens = line.split_whitespace().peekable();
        if let Some(first) = tokens.peek() {
            if DUMMY_TOKENS.contains(first) {
                tokens.next();
            }
        }
        let values = tokens
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    ScanError::Decode(format!("non-numeric token '{}' in line '{}'", t, line))
                })
            })
            .collect::<ScanResult<Vec<f64>>>()?;
        if values.is_empty() {
            return Ok(());
        }

        match self.tokens_per_line {
            None => {
                let k = values.len();
                if self.pixels % k != 0 {
                    return Err(ScanError::Decode(format!(
                        "grid edge {} is not an integer multiple of the {} values per data line",
                        self.pixels, k
                    )));
                }
                self.tokens_per_line = Some(k);
                self.expected_lines = Some(self.pixels * (self.pixels / k));
            }
            Some(k) if values.len() != k => {
                return Err(ScanError::Decode(format!(
                    "inconsistent data line: {} values where {} were expected",
                    values.len(),
                    k
                )));
            }
            Some(_) => {}
        }
        self.lines.push(values);
        Ok(())
    }

    /// Current completion snapshot.
    pub fn progress(&self) -> ScanProgress {
        let decoded_lines = self.lines.len();
        let fraction = match self.expected_lines {
            Some(expected) if expected > 0 => (decoded_lines as f64 / expected as f64).min(1.0),
            _ => 0.0,
        };
        ScanProgress {
            decoded_lines,
            expected_lines: self.expected_lines,
            fraction,
        }
    }

    /// Valid data lines decoded so far.
    pub fn decoded_lines(&self) -> usize {
        self.lines.len()
    }

    /// Materialize the full grid after the producer has exited.
    ///
    /// A final unterminated line is flushed first. Fails when the stream
    /// holds fewer lines than the grid needs.
    pub fn into_grid(mut self) -> ScanResult<Vec<Vec<f64>>> {
        if !self.carry.trim().is_empty() {
            let tail = std::mem::take(&mut self.carry);
            self.decode_line(tail.trim())?;
        }
        let k = self
            .tokens_per_line
            .ok_or_else(|| ScanError::Decode("no valid data lines in stream".to_string()))?;
        let lines_per_chunk = self.pixels / k;
        let expected = self.pixels * lines_per_chunk;
        if self.lines.len() < expected {
            return Err(ScanError::Decode(format!(
                "expected at least {} data lines, got {}",
                expected,
                self.lines.len()
            )));
        }

        let mut rows = Vec::with_capacity(self.pixels);
        for i in 0..self.pixels {
            let mut row = Vec::with_capacity(self.pixels);
            for line in &self.lines[i * lines_per_chunk..(i + 1) * lines_per_chunk] {
                row.extend_from_slice(line);
            }
            if row.len() != self.pixels {
                return Err(ScanError::Decode(format!(
                    "row {} holds {} values, expected {}",
                    i,
                    row.len(),
                    self.pixels
                )));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

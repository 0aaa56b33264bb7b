//! Purpose: Turn a byte stream (file or stdin) into a lazy stream of JSON records.
//! Exports: `IngestMode`, `ErrorPolicy`, `IngestConfig`, `RowReader`.
//! Role: Row source for the CLI; pulls one record per `next()` so pipelines stay lazy.
//! Invariants: Auto detection looks only at the first non-whitespace byte.
//! Invariants: JSON-lines mode reads at most the record cap per line; longer lines are skipped past and rejected.
//! Invariants: JSON mode reads at most the document cap, and each array element is held to the record cap.
//! Invariants: Stop policy ends the stream after the first failure; skip logs and continues.
use std::io::{self, BufRead, Read};

use bstr::ByteSlice;
use relq::api::{Error, ErrorKind, Record};
use serde_json::Value;
use serde_json::value::RawValue;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IngestMode {
    Auto,
    Jsonl,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorPolicy {
    Stop,
    Skip,
}

#[derive(Copy, Clone, Debug)]
pub struct IngestConfig {
    pub mode: IngestMode,
    pub errors: ErrorPolicy,
    pub max_record_bytes: usize,
    pub max_document_bytes: usize,
    pub max_snippet_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Auto,
            errors: ErrorPolicy::Stop,
            max_record_bytes: 1024 * 1024,
            max_document_bytes: 64 * 1024 * 1024,
            max_snippet_bytes: 64,
        }
    }
}

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

pub struct RowReader<R: BufRead> {
    reader: R,
    config: IngestConfig,
    mode: IngestMode,
    line_no: u64,
    buf: Vec<u8>,
    document: Option<std::vec::IntoIter<Box<RawValue>>>,
    doc_row: u64,
    done: bool,
}

impl<R: BufRead> RowReader<R> {
    pub fn new(reader: R, config: IngestConfig) -> Self {
        Self {
            reader,
            config,
            mode: config.mode,
            line_no: 0,
            buf: Vec::new(),
            document: None,
            doc_row: 0,
            done: false,
        }
    }

    /// Resolves `Auto` by peeking past leading whitespace: `[` means one JSON document.
    fn sniff(&mut self) -> Result<IngestMode, Error> {
        loop {
            let available = self
                .reader
                .fill_buf()
                .map_err(|err| io_error(err, "failed to read input"))?;
            if available.is_empty() {
                return Ok(IngestMode::Jsonl);
            }
            let skip = available
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            let newlines = available[..skip].iter().filter(|b| **b == b'\n').count();
            let first = available.get(skip).copied();
            self.reader.consume(skip);
            self.line_no += newlines as u64;
            match first {
                Some(b'[') => return Ok(IngestMode::Json),
                Some(_) => return Ok(IngestMode::Jsonl),
                None => continue,
            }
        }
    }

    fn next_line(&mut self) -> Option<Result<Record, Error>> {
        // Room for the record plus a trailing "\r\n".
        let cap = (self.config.max_record_bytes as u64).saturating_add(2);
        loop {
            self.buf.clear();
            let read = match self
                .reader
                .by_ref()
                .take(cap)
                .read_until(b'\n', &mut self.buf)
            {
                Ok(read) => read,
                Err(err) => return Some(Err(io_error(err, "failed to read input"))),
            };
            if read == 0 {
                return None;
            }
            self.line_no += 1;
            let mut truncated = false;
            if read as u64 == cap && self.buf.last() != Some(&b'\n') {
                match self.reader.skip_until(b'\n') {
                    Ok(rest) => truncated = rest > 0,
                    Err(err) => return Some(Err(io_error(err, "failed to read input"))),
                }
            }
            let line = self.buf.trim();
            if line.is_empty() && !truncated {
                continue;
            }
            if truncated || line.len() > self.config.max_record_bytes {
                return Some(Err(oversize_record(self.config.max_record_bytes)
                    .with_line(self.line_no)));
            }
            let parsed = serde_json::from_slice::<Value>(line).map_err(|err| {
                Error::new(ErrorKind::Parse)
                    .with_message("invalid json input")
                    .with_line(self.line_no)
                    .with_hint(format!(
                        "near: {}",
                        truncate_bytes(line, self.config.max_snippet_bytes)
                    ))
                    .with_source(err)
            });
            let line_no = self.line_no;
            return Some(parsed.and_then(|value| into_record(value).map_err(|e| e.with_line(line_no))));
        }
    }

    /// Reads the whole document under the document cap and splits it into raw elements.
    fn load_document(&mut self) -> Result<std::vec::IntoIter<Box<RawValue>>, Error> {
        let limit = self.config.max_document_bytes;
        let mut text = Vec::new();
        self.reader
            .by_ref()
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut text)
            .map_err(|err| io_error(err, "failed to read input"))?;
        if text.len() > limit {
            return Err(Error::new(ErrorKind::Parse)
                .with_message("document exceeds size limit")
                .with_hint(format!(
                    "JSON documents are capped at {limit} bytes; raise --max-document-bytes or feed JSON lines, which stream."
                )));
        }
        let body = text.trim_start();
        if body.trim_end().is_empty() {
            return Ok(Vec::new().into_iter());
        }
        let document_error = |err: serde_json::Error| {
            Error::new(ErrorKind::Parse)
                .with_message("invalid json document")
                .with_line(self.line_no + err.line() as u64)
                .with_source(err)
        };
        let rows = if body.first() == Some(&b'[') {
            serde_json::from_slice::<Vec<Box<RawValue>>>(body).map_err(document_error)?
        } else {
            vec![serde_json::from_slice::<Box<RawValue>>(body).map_err(document_error)?]
        };
        tracing::debug!(rows = rows.len(), bytes = text.len(), "loaded json document");
        Ok(rows.into_iter())
    }

    fn next_document_row(&mut self) -> Option<Result<Record, Error>> {
        if self.document.is_none() {
            match self.load_document() {
                Ok(rows) => self.document = Some(rows),
                Err(err) => return Some(Err(err)),
            }
        }
        let raw = self.document.as_mut()?.next()?;
        let row = self.doc_row;
        self.doc_row += 1;
        if raw.get().len() > self.config.max_record_bytes {
            return Some(Err(oversize_record(self.config.max_record_bytes).with_row(row)));
        }
        let parsed = serde_json::from_str::<Value>(raw.get()).map_err(|err| {
            Error::new(ErrorKind::Parse)
                .with_message("invalid json input")
                .with_row(row)
                .with_source(err)
        });
        Some(parsed.and_then(|value| into_record(value).map_err(|e| e.with_row(row))))
    }
}

fn oversize_record(limit: usize) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message("record exceeds size limit")
        .with_hint(format!(
            "Records are capped at {limit} bytes; raise --max-record-bytes to accept larger rows."
        ))
}

impl<R: BufRead> Iterator for RowReader<R> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.mode == IngestMode::Auto {
                match self.sniff() {
                    Ok(mode) => self.mode = mode,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }
            let next = match self.mode {
                IngestMode::Json => self.next_document_row(),
                _ => self.next_line(),
            };
            match next {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(record)) => return Some(Ok(record)),
                Some(Err(err)) if err.kind() == ErrorKind::Io => {
                    self.done = true;
                    return Some(Err(err));
                }
                Some(Err(err)) => match self.config.errors {
                    ErrorPolicy::Stop => {
                        self.done = true;
                        return Some(Err(err));
                    }
                    ErrorPolicy::Skip => {
                        tracing::warn!(error = %err, "skipping input record");
                        if self.mode == IngestMode::Json && self.document.is_none() {
                            self.done = true;
                        }
                    }
                },
            }
        }
    }
}

fn into_record(value: Value) -> Result<Record, Error> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(Error::new(ErrorKind::Parse)
            .with_message("row is not a JSON object")
            .with_hint(format!("got: {}", truncate_snippet(&other.to_string(), 64)))),
    }
}

fn truncate_snippet(input: &str, max: usize) -> String {
    if input.len() <= max {
        return input.to_string();
    }
    let suffix = "...";
    let budget = max.saturating_sub(suffix.len());
    let mut end = 0;
    for (idx, ch) in input.char_indices() {
        if idx + ch.len_utf8() > budget {
            break;
        }
        end = idx + ch.len_utf8();
    }
    format!("{}{suffix}", &input[..end])
}

fn truncate_bytes(input: &[u8], max: usize) -> String {
    let text = input.to_str_lossy();
    truncate_snippet(&text, max)
}

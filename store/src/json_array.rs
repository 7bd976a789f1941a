//! Incremental reader over an on-disk JSON array.
//!
//! Exported legacy tables can run to multiple gigabytes, so the file is
//! never materialised: a byte-level scanner slices out one top-level
//! element at a time (tracking string/escape state and bracket depth) and
//! only the current batch is parsed. Because batches are handed to the
//! caller synchronously, the file is not read while the caller works;
//! backpressure is inherent.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

/// Structural errors raised by the element scanner.
#[derive(Debug, thiserror::Error)]
pub enum JsonArrayError {
    #[error("expected a top-level JSON array, found byte {found:?} at offset {offset}")]
    NotAnArray { found: char, offset: u64 },
    #[error("unexpected byte {found:?} between array elements at offset {offset}")]
    UnexpectedByte { found: char, offset: u64 },
    #[error("input ended before the array was closed (offset {offset})")]
    UnexpectedEof { offset: u64 },
    #[error("element {index} is not valid JSON")]
    InvalidElement {
        index: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Reader over a file containing one top-level JSON array.
#[derive(Debug, Clone)]
pub struct JsonArrayReader {
    path: PathBuf,
}

impl JsonArrayReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scanner(&self) -> Result<ElementScanner<BufReader<File>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        Ok(ElementScanner::new(BufReader::new(file)))
    }

    /// Number of top-level elements, without parsing them.
    pub fn count(&self) -> Result<u64> {
        let mut scanner = self.scanner()?;
        let mut count = 0u64;
        while scanner.next_element_raw()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// First `n` parsed elements; reading stops after the `n`-th.
    ///
    /// A scan or parse error past the `n`-th element is unreachable by
    /// construction (the read stops first), so a truncated tail after a
    /// full sample does not fail the call.
    pub fn sample(&self, n: usize) -> Result<Vec<Value>> {
        let mut scanner = self.scanner()?;
        let mut out = Vec::with_capacity(n.min(64));
        while out.len() < n {
            match scanner.next_element()? {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(out)
    }

    /// Invoke `f(batch, batch_index)` for each contiguous batch of up to
    /// `batch_size` elements. An `Err` from `f` aborts the scan. Returns the
    /// total number of elements read.
    pub fn for_each_batch<F>(&self, batch_size: usize, mut f: F) -> Result<u64>
    where
        F: FnMut(&[Value], usize) -> Result<()>,
    {
        assert!(batch_size > 0, "batch_size must be positive");
        let mut scanner = self.scanner()?;
        let mut batch: Vec<Value> = Vec::with_capacity(batch_size);
        let mut batch_index = 0usize;
        let mut total = 0u64;

        loop {
            let element = scanner.next_element()?;
            match element {
                Some(value) => {
                    batch.push(value);
                    total += 1;
                    if batch.len() == batch_size {
                        f(&batch, batch_index)
                            .with_context(|| format!("batch {batch_index} callback failed"))?;
                        batch.clear();
                        batch_index += 1;
                    }
                }
                None => {
                    if !batch.is_empty() {
                        f(&batch, batch_index)
                            .with_context(|| format!("batch {batch_index} callback failed"))?;
                    }
                    return Ok(total);
                }
            }
        }
    }
}

/// Pulls one top-level array element at a time out of a byte stream.
struct ElementScanner<R: Read> {
    reader: R,
    buf: Vec<u8>,
    /// Read position within `buf`.
    pos: usize,
    /// Valid bytes in `buf`.
    len: usize,
    offset: u64,
    started: bool,
    finished: bool,
    index: u64,
}

const SCAN_BUF_SIZE: usize = 64 * 1024;

impl<R: Read> ElementScanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; SCAN_BUF_SIZE],
            pos: 0,
            len: 0,
            offset: 0,
            started: false,
            finished: false,
            index: 0,
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.pos == self.len {
            self.len = self
                .reader
                .read(&mut self.buf)
                .context("Failed to read JSON array input")?;
            self.pos = 0;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        self.offset += 1;
        Ok(Some(byte))
    }

    fn next_non_ws(&mut self) -> Result<Option<u8>> {
        loop {
            match self.next_byte()? {
                Some(b) if b.is_ascii_whitespace() => {}
                other => return Ok(other),
            }
        }
    }

    /// Raw bytes of the next element, or `None` once the array is closed.
    fn next_element_raw(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            match self.next_non_ws()? {
                Some(b'[') => self.started = true,
                Some(other) => {
                    return Err(JsonArrayError::NotAnArray {
                        found: other as char,
                        offset: self.offset,
                    }
                    .into());
                }
                None => {
                    return Err(JsonArrayError::UnexpectedEof {
                        offset: self.offset,
                    }
                    .into());
                }
            }
        }

        let first = match self.next_non_ws()? {
            Some(b']') => {
                self.finished = true;
                return Ok(None);
            }
            Some(b',') => match self.next_non_ws()? {
                Some(b) => b,
                None => {
                    return Err(JsonArrayError::UnexpectedEof {
                        offset: self.offset,
                    }
                    .into());
                }
            },
            Some(b) => b,
            None => {
                return Err(JsonArrayError::UnexpectedEof {
                    offset: self.offset,
                }
                .into());
            }
        };

        let mut element = vec![first];
        let mut depth: u32 = match first {
            b'{' | b'[' => 1,
            _ => 0,
        };
        let mut in_string = first == b'"';
        let mut escaped = false;

        if depth == 0 && !in_string {
            // Scalar: runs until a top-level ',' or ']'.
            loop {
                match self.next_byte()? {
                    Some(b',') => break,
                    Some(b']') => {
                        self.finished = true;
                        break;
                    }
                    Some(b) => element.push(b),
                    None => {
                        return Err(JsonArrayError::UnexpectedEof {
                            offset: self.offset,
                        }
                        .into());
                    }
                }
            }
            self.index += 1;
            return Ok(Some(element));
        }

        loop {
            let byte = match self.next_byte()? {
                Some(b) => b,
                None => {
                    return Err(JsonArrayError::UnexpectedEof {
                        offset: self.offset,
                    }
                    .into());
                }
            };
            element.push(byte);

            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                    if depth == 0 {
                        break;
                    }
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }

        self.index += 1;
        Ok(Some(element))
    }

    fn next_element(&mut self) -> Result<Option<Value>> {
        let index = self.index;
        match self.next_element_raw()? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|source| JsonArrayError::InvalidElement { index, source })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

//! # Line Framer
//!
//! Accumulates raw socket reads and yields complete newline-terminated
//! lines. A line split across several reads is reassembled; a trailing
//! partial line stays buffered until the next read completes it.
//!
//! Buffered memory per connection is bounded by `max_line_bytes`. A line
//! that grows past the bound is either skipped up to its terminating newline
//! (`OverflowPolicy::Resync`) or reported as an error so the caller can close
//! the connection (`OverflowPolicy::Close`).

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::configs::OverflowPolicy;

/// Framing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Per-connection line splitter.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_bytes: usize,
    policy: OverflowPolicy,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
    overflows: u64,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize, policy: OverflowPolicy) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line_bytes,
            policy,
            discarding: false,
            scanned: 0,
            overflows: 0,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of oversized lines seen so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Bytes currently held for an unterminated line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete, whitespace-trimmed, non-empty line, or
    /// `Ok(None)` when more input is needed.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            let Some(pos) = found.map(|offset| self.scanned + offset) else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_line_bytes {
                    if !self.discarding {
                        self.overflow()?;
                    }
                    self.buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                return Ok(None);
            };

            let line = self.buf.split_to(pos + 1).freeze();
            self.scanned = 0;
            if self.discarding {
                // Tail of a line already reported as oversized.
                self.discarding = false;
                continue;
            }
            if pos > self.max_line_bytes {
                self.overflow()?;
                continue;
            }

            let (start, end) = trimmed_bounds(&line[..pos]);
            if start == end {
                continue;
            }
            return Ok(Some(line.slice(start..end)));
        }
    }

    fn overflow(&mut self) -> Result<(), FrameError> {
        self.overflows += 1;
        match self.policy {
            OverflowPolicy::Resync => Ok(()),
            OverflowPolicy::Close => Err(FrameError::LineTooLong {
                limit: self.max_line_bytes,
            }),
        }
    }
}

fn trimmed_bounds(line: &[u8]) -> (usize, usize) {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    (start, end)
}

//! Byte-stream line splitting for subprocess output
//!
//! Reads whatever the pipe has ready and splits lines locally, so a BMC that
//! leaves the stream open without a trailing newline never blocks a reader.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;
/// Unterminated runs longer than this are emitted as a line of their own
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    /// Start of the first unconsumed byte in `pending`
    start: usize,
    /// `pending[start..searched]` holds no newline
    searched: usize,
    chunk: Box<[u8]>,
    bytes_read: u64,
    lines_read: u64,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            start: 0,
            searched: 0,
            chunk: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            bytes_read: 0,
            lines_read: 0,
            eof: false,
        }
    }

    /// Wait until some bytes are available and buffer them.
    ///
    /// Cancel-safe: nothing is lost if the future is dropped before it
    /// resolves. Returns `Ok(false)` at end of stream.
    pub async fn fill(&mut self) -> io::Result<bool> {
        let n = self.inner.read(&mut self.chunk).await?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.compact();
        self.bytes_read += n as u64;
        self.pending.extend_from_slice(&self.chunk[..n]);
        Ok(true)
    }

    /// Next newline-terminated line already buffered, if any.
    ///
    /// A run of `MAX_LINE_LEN` bytes without a newline is returned as is.
    pub fn next_line(&mut self) -> Option<String> {
        if let Some(rel) = self.pending[self.searched..].iter().position(|&b| b == b'\n') {
            let pos = self.searched + rel;
            let line = decode(&self.pending[self.start..pos]);
            self.start = pos + 1;
            self.searched = self.start;
            self.lines_read += 1;
            return Some(line);
        }
        self.searched = self.pending.len();

        if self.searched - self.start < MAX_LINE_LEN {
            return None;
        }
        let cut = self.start + MAX_LINE_LEN;
        let line = decode(&self.pending[self.start..cut]);
        self.start = cut;
        self.lines_read += 1;
        Some(line)
    }

    /// Unterminated bytes left once the stream is exhausted.
    pub fn take_remainder(&mut self) -> Option<String> {
        let line = (self.start < self.pending.len()).then(|| decode(&self.pending[self.start..]));
        self.pending.clear();
        self.start = 0;
        self.searched = 0;
        if line.is_some() {
            self.lines_read += 1;
        }
        line
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Drop consumed bytes so the buffer only holds the unterminated tail.
    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.pending.drain(..self.start);
        self.searched -= self.start;
        self.start = 0;
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\r').to_string()
}

//! Purpose: Pull bounded chunks of raw input from blocking or suspending readers.
//! Exports: `ChunkSource`, `ReadSource`, `AsyncReadSource`, `TextChunker`, `Step`.
//! Role: Leaf I/O layer under both decoders; owns no parsing state.
//! Invariants: `fill` returns 0 only at true end of input.
//! Invariants: Text chunks never end inside a UTF-8 sequence; the tail is carried over.
//! Notes: Total size is best-effort and only used for progress percentages.
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bstr::ByteSlice;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::error::{Error, ErrorKind};

/// Outcome of asking a decoder for its next unit.
#[derive(Debug, PartialEq)]
pub enum Step<T> {
    Unit(T),
    /// Feed another chunk via `spare`/`commit` before asking again.
    NeedData,
    Done,
}

pub trait ChunkSource {
    /// Read into `buf` (never empty); `Ok(0)` means end of input.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn total_len(&self) -> Option<u64> {
        None
    }
}

pub struct ReadSource<R> {
    inner: R,
    total_len: Option<u64>,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            total_len: None,
        }
    }

    pub fn with_total_len(mut self, total_len: u64) -> Self {
        self.total_len = Some(total_len);
        self
    }
}

impl ReadSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| open_error(err, path))?;
        let total_len = file.metadata().ok().map(|meta| meta.len());
        Ok(Self {
            inner: file,
            total_len,
        })
    }
}

impl<R: Read> ChunkSource for ReadSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn total_len(&self) -> Option<u64> {
        self.total_len
    }
}

pub struct AsyncReadSource<R> {
    inner: R,
    total_len: Option<u64>,
}

impl<R: AsyncRead + Unpin> AsyncReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            total_len: None,
        }
    }

    pub fn with_total_len(mut self, total_len: u64) -> Self {
        self.total_len = Some(total_len);
        self
    }

    /// Suspending counterpart of `ChunkSource::fill`.
    pub async fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf).await {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    pub fn total_len(&self) -> Option<u64> {
        self.total_len
    }
}

impl AsyncReadSource<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| open_error(err, path))?;
        let total_len = file.metadata().await.ok().map(|meta| meta.len());
        Ok(Self {
            inner: file,
            total_len,
        })
    }
}

fn open_error(err: io::Error, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to open input")
        .with_source_name(path.display().to_string())
        .with_source(err)
}

/// Reusable chunk buffer that hands out text ending on a character boundary.
pub struct TextChunker {
    buf: Vec<u8>,
    chunk_size: usize,
    carry: usize,
    filled: usize,
    ready: usize,
    lossy_logged: bool,
}

impl TextChunker {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            buf: vec![0; chunk_size + 4],
            chunk_size,
            carry: 0,
            filled: 0,
            ready: 0,
            lossy_logged: false,
        }
    }

    /// Region the next read should land in.
    pub fn spare(&mut self) -> &mut [u8] {
        let start = self.carry;
        &mut self.buf[start..start + self.chunk_size]
    }

    /// Account for `read` fresh bytes; at end of input any carried bytes are flushed.
    pub fn commit(&mut self, read: usize, eof: bool) {
        self.filled = self.carry + read;
        self.ready = if eof {
            self.filled
        } else {
            complete_utf8_len(&self.buf[..self.filled])
        };
    }

    /// The decoded text made ready by the last `commit`.
    pub fn text(&mut self) -> Cow<'_, str> {
        let bytes = &self.buf[..self.ready];
        match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => {
                if !self.lossy_logged {
                    self.lossy_logged = true;
                    tracing::warn!("input is not valid UTF-8; replacing invalid sequences");
                }
                bytes.to_str_lossy()
            }
        }
    }

    /// Drop the text handed out and move the incomplete tail to the front.
    pub fn consume(&mut self) {
        self.buf.copy_within(self.ready..self.filled, 0);
        self.carry = self.filled - self.ready;
        self.filled = self.carry;
        self.ready = 0;
    }

    pub fn has_carry(&self) -> bool {
        self.carry > 0
    }
}

/// Length of the longest prefix of `bytes` that does not end mid-sequence.
fn complete_utf8_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let floor = len.saturating_sub(4);
    let mut idx = len;
    while idx > floor {
        idx -= 1;
        let byte = bytes[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            b if b < 0x80 => 1,
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return len,
        };
        return if len - idx < width { idx } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::{ChunkSource, ReadSource, TextChunker, complete_utf8_len};

    #[test]
    fn complete_len_holds_back_partial_sequences() {
        let text = "aé€😀".as_bytes();
        assert_eq!(complete_utf8_len(text), text.len());
        assert_eq!(complete_utf8_len(&text[..2]), 1);
        assert_eq!(complete_utf8_len(&text[..4]), 3);
        assert_eq!(complete_utf8_len(&text[..text.len() - 1]), 6);
    }

    #[test]
    fn chunker_carries_split_characters() {
        let input = "né€".as_bytes();
        let mut source = ReadSource::new(input);
        let mut chunker = TextChunker::new(2);
        let mut out = String::new();
        loop {
            let read = source.fill(chunker.spare()).expect("fill");
            chunker.commit(read, read == 0);
            out.push_str(&chunker.text());
            chunker.consume();
            if read == 0 {
                break;
            }
        }
        assert_eq!(out, "né€");
        assert!(!chunker.has_carry());
    }

    #[test]
    fn chunker_replaces_invalid_bytes() {
        let mut chunker = TextChunker::new(8);
        let spare = chunker.spare();
        spare[..3].copy_from_slice(&[b'a', 0xff, b'b']);
        chunker.commit(3, false);
        assert_eq!(chunker.text(), "a\u{fffd}b");
    }

    #[test]
    fn read_source_reports_total_len() {
        let source = ReadSource::new(&b"abc"[..]).with_total_len(3);
        assert_eq!(source.total_len(), Some(3));
    }
}

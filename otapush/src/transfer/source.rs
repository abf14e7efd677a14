//! Sequential chunk reader over a firmware image.

use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A lazy, finite, non-restartable sequence of byte chunks read
/// sequentially from a firmware image.
///
/// The image is an opaque blob; no parsing or validation happens here.
pub struct ChunkSource<R> {
    inner: R,
}

impl ChunkSource<File> {
    /// Open a firmware image file, returning the source and the image size.
    pub fn from_file(path: impl AsRef<Path>) -> Result<(Self, u64)> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok((Self::new(file), size))
    }
}

impl<R: Read> ChunkSource<R> {
    /// Wrap any byte reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next chunk of at most `max_size` bytes.
    ///
    /// Returns `Ok(None)` at end of input. A chunk is only shorter than
    /// `max_size` at the tail of the image.
    pub fn next_chunk(&mut self, max_size: usize) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; max_size];
        let mut filled = 0;

        while filled < max_size {
            match self.inner.read(&mut chunk[filled..])? {
                0 => break,
                n => filled += n,
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }
}

use std::io;

use crate::buffer::FillSource;
use crate::constants::DEFAULT_STREAM_CHUNK;
use crate::result::{Error, Result};

pub struct StreamReader<R> {
    inner: R,
    chunk_size: usize,
}

impl<R: io::Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_STREAM_CHUNK)
    }

    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read> FillSource for StreamReader<R> {
    fn fill(&mut self, data: &mut Vec<u8>, min: usize) -> Result<usize> {
        let start = data.len();
        let want = min.max(self.chunk_size);
        data.resize(start + want, 0);

        let mut filled = 0;
        while filled < min {
            match self.inner.read(&mut data[start + filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    data.truncate(start + filled);
                    return Err(e.into());
                }
            }
        }
        data.truncate(start + filled);
        if filled < min {
            return Err(Error::TruncatedInput {
                needed: min - filled,
                available: filled,
            });
        }
        Ok(filled)
    }
}

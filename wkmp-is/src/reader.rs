//! `std::io` and symphonia adapters over an [`InputStream`]
//!
//! Lets the decoder stack consume a bridged stream like a file:
//!
//! ```ignore
//! let reader = InputStreamReader::new(Arc::clone(&stream));
//! let mss = MediaSourceStream::new(Box::new(reader), Default::default());
//! ```

use crate::error::StreamError;
use crate::stream::InputStream;
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::io::MediaSource;

/// Blocking `Read + Seek` view of an input stream
#[derive(Debug)]
pub struct InputStreamReader<S> {
    stream: S,
}

impl<S: InputStream> InputStreamReader<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Resolve a `SeekFrom` against the stream's position and size
    fn resolve(&self, pos: SeekFrom) -> Result<u64, StreamError> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => return Ok(offset),
            SeekFrom::Current(delta) => (self.stream.offset(), delta),
            SeekFrom::End(delta) => match self.stream.size() {
                Some(size) => (size, delta),
                None => {
                    return Err(StreamError::InvalidSeek(
                        "end-relative seek on stream of unknown size".into(),
                    ))
                }
            },
        };

        base.checked_add_signed(delta).ok_or_else(|| {
            StreamError::InvalidSeek(format!("offset {} {:+} out of range", base, delta))
        })
    }
}

impl<S: InputStream> Read for InputStreamReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.stream.read(buf)?)
    }
}

impl<S: InputStream> Seek for InputStreamReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = self.resolve(pos)?;
        self.stream.seek(target)?;
        Ok(self.stream.offset())
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.stream.offset())
    }
}

impl<S: InputStream> MediaSource for InputStreamReader<S> {
    fn is_seekable(&self) -> bool {
        self.stream.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.stream.size()
    }
}

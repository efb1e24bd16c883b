//! Blocking input stream contract
//!
//! This is what decoders and other pull-based consumers program against.
//! Every call that can block or fail first surfaces any failure the
//! producer has posted.

use crate::error::Result;
use crate::tag::Tag;
use std::sync::Arc;

/// Blocking, pull-based byte stream
pub trait InputStream: Send + Sync {
    /// Location this stream was opened from
    fn uri(&self) -> &str;

    /// Surface a postponed producer failure, if any (never blocks)
    fn check(&self) -> Result<()>;

    /// True once no more bytes will ever be returned by `read`
    fn is_eof(&self) -> bool;

    /// Reposition to an absolute byte offset, blocking until done
    fn seek(&self, offset: u64) -> Result<()>;

    /// Take the pending metadata tag, if one arrived since the last call
    fn read_tag(&self) -> Result<Option<Tag>>;

    /// True if `read` would return without blocking (data, EOF) or a tag is pending
    fn is_available(&self) -> Result<bool>;

    /// Read up to `buf.len()` bytes, blocking until at least one is available
    ///
    /// Returns `Ok(0)` only at end of stream (or for an empty `buf`).
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Current read position
    fn offset(&self) -> u64;

    /// Total size in bytes, if known
    fn size(&self) -> Option<u64>;

    fn is_seekable(&self) -> bool;
}

impl<S: InputStream + ?Sized> InputStream for Arc<S> {
    fn uri(&self) -> &str {
        (**self).uri()
    }

    fn check(&self) -> Result<()> {
        (**self).check()
    }

    fn is_eof(&self) -> bool {
        (**self).is_eof()
    }

    fn seek(&self, offset: u64) -> Result<()> {
        (**self).seek(offset)
    }

    fn read_tag(&self) -> Result<Option<Tag>> {
        (**self).read_tag()
    }

    fn is_available(&self) -> Result<bool> {
        (**self).is_available()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
}

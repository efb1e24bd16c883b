//! Error types for wkmp-is
//!
//! Two error families cross the bridge:
//! - [`SourceError`]: raised on the producer side (I/O thread) and never
//!   returned there directly; it is parked in the stream's postponed-error
//!   slot and handed to the consumer on its next call.
//! - [`StreamError`]: what consumer-facing operations return.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Producer-side failure
#[derive(Error, Debug)]
pub enum SourceError {
    /// Underlying read/connect failed
    #[error("Source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent something the source cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote rejected the request
    #[error("HTTP status {status}")]
    Http { status: u16 },

    /// Source gave up on its own (shutdown, cancelled transfer)
    #[error("Source aborted: {0}")]
    Aborted(String),
}

/// Consumer-facing failure
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// Postponed producer failure; the stream is failed from now on
    #[error("Input source failed: {0}")]
    Source(Arc<SourceError>),

    /// A seek is already outstanding on this stream
    #[error("Seek to {offset} rejected: another seek is in progress")]
    SeekInProgress { offset: u64 },

    /// Stream does not support repositioning
    #[error("Stream is not seekable")]
    NotSeekable,

    /// Seek target cannot be expressed (before start, or end-relative without a known size)
    #[error("Invalid seek: {0}")]
    InvalidSeek(String),

    /// Caller-side wait expired
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Producer event loop is gone; deferred work cannot run
    #[error("Event loop stopped")]
    EventLoopStopped,

    /// Buffer sizing rejected at construction
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// True if this is a postponed producer failure
    pub fn is_source_failure(&self) -> bool {
        matches!(self, StreamError::Source(_))
    }
}

impl From<SourceError> for StreamError {
    fn from(err: SourceError) -> Self {
        StreamError::Source(Arc::new(err))
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Source(_) => std::io::ErrorKind::Other,
            StreamError::SeekInProgress { .. } => std::io::ErrorKind::WouldBlock,
            StreamError::NotSeekable => std::io::ErrorKind::Unsupported,
            StreamError::InvalidSeek(_) => std::io::ErrorKind::InvalidInput,
            StreamError::Timeout(_) => std::io::ErrorKind::TimedOut,
            StreamError::EventLoopStopped => std::io::ErrorKind::BrokenPipe,
            StreamError::InvalidConfig(_) => std::io::ErrorKind::InvalidInput,
        };
        std::io::Error::new(kind, err)
    }
}

/// Convenience Result type using wkmp-is StreamError
pub type Result<T> = std::result::Result<T, StreamError>;

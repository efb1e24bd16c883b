//! # WKMP Input Stream Library (wkmp-is)
//!
//! Blocking reads over non-blocking sources.
//!
//! **Purpose:** Let a decoder thread pull bytes with plain blocking calls
//! while the source (file, socket, HTTP transfer) is driven from its own
//! event loop thread.
//!
//! **Architecture:** [`AsyncInputStream`] owns a fixed-size ring buffer
//! (ringbuf) guarded by a mutex + condvar. Flow control and seek requests are
//! handed to the producer through [`DeferredCall`]s on an [`EventLoop`].
//! [`InputStreamReader`] adapts any [`InputStream`] to `std::io` and
//! symphonia's `MediaSource`.

pub mod async_stream;
pub mod buffer;
pub mod error;
pub mod event_loop;
pub mod reader;
pub mod source;
pub mod stream;
pub mod tag;

pub use async_stream::{
    AsyncInputStream, AsyncSource, InputStreamStats, SeekState, StreamConfig, WriteBuffer,
};
pub use error::{Result, SourceError, StreamError};
pub use event_loop::{DeferredCall, EventLoop, EventLoopHandle};
pub use reader::InputStreamReader;
pub use stream::InputStream;
pub use tag::{Tag, TagItem, TagType};

//! Asynchronous-to-blocking input stream bridge
//!
//! [`AsyncInputStream`] sits between a non-blocking source running on an
//! [`EventLoop`](crate::event_loop::EventLoop) and a consumer thread that
//! wants plain blocking reads.
//!
//! ```text
//! Source (event loop)                         Consumer (any thread)
//!   append_to_buffer() / prepare_write_buffer()    read()
//!   set_tag() / post_error() / set_closed()        read_tag() / check()
//!   seek_done()                                    seek()
//!          │                                          │
//!          └──────────► state mutex + condvar ◄───────┘
//!                             │
//!              deferred resume / deferred seek
//!                  (run on the event loop)
//! ```
//!
//! **Flow control:** a write that fills the buffer pauses the producer. Once
//! the consumer drains it to `resume_at` bytes or below, a resume is
//! scheduled on the event loop, which calls [`AsyncSource::do_resume`].
//!
//! **Seeking:** `NONE → SCHEDULED` when the consumer asks, `SCHEDULED →
//! PENDING` once the event loop hands the offset to [`AsyncSource::do_seek`],
//! and back to `NONE` when the source calls [`AsyncInputStream::seek_done`]
//! (or fails). Only one seek can be outstanding at a time.
//!
//! **Errors:** producer failures are parked with [`AsyncInputStream::post_error`]
//! and surface on the consumer's next call. Once surfaced, the stream stays
//! failed.
//!
//! Source callbacks are always invoked without the state lock held, so a
//! source may call back into the producer API from inside them.

use crate::buffer::InputBuffer;
use crate::error::{Result, SourceError, StreamError};
use crate::event_loop::{DeferredCall, EventLoopHandle};
use crate::stream::InputStream;
use crate::tag::Tag;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use wkmp_common::params::{PARAMS, DEFAULT_INPUT_BUFFER_SIZE, DEFAULT_INPUT_RESUME_AT};

/// Producer-side hooks driven from the event loop
///
/// Both run on the event loop thread without the stream lock held.
/// Returning `Err` parks the failure as the stream's postponed error.
pub trait AsyncSource: Send + Sync + 'static {
    /// Restart production after a pause
    fn do_resume(&self, stream: &Arc<AsyncInputStream>) -> std::result::Result<(), SourceError>;

    /// Start repositioning to `offset`
    ///
    /// The source must eventually call [`AsyncInputStream::seek_done`] (possibly
    /// before returning) or return/post an error.
    fn do_seek(
        &self,
        stream: &Arc<AsyncInputStream>,
        offset: u64,
    ) -> std::result::Result<(), SourceError>;
}

/// Seek negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekState {
    /// No seek outstanding
    None,
    /// Requested by the consumer, not yet handed to the source
    Scheduled,
    /// Handed to the source, waiting for `seek_done`
    Pending,
}

/// Buffer sizing for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ring capacity in bytes
    pub buffer_size: usize,

    /// Resume the producer once occupancy drops to this many bytes
    pub resume_at: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            resume_at: DEFAULT_INPUT_RESUME_AT,
        }
    }
}

impl StreamConfig {
    pub fn new(buffer_size: usize, resume_at: usize) -> Result<Self> {
        let config = Self {
            buffer_size,
            resume_at,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sizing from the global parameter set
    pub fn from_params() -> Result<Self> {
        Self::new(PARAMS.input_buffer_size(), PARAMS.input_resume_at())
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(StreamError::InvalidConfig(
                "buffer_size must be greater than zero".into(),
            ));
        }
        if self.resume_at >= self.buffer_size {
            return Err(StreamError::InvalidConfig(format!(
                "resume_at ({}) must be less than buffer_size ({})",
                self.resume_at, self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of a stream, for logging and diagnostics
#[derive(Debug, Clone)]
pub struct InputStreamStats {
    pub capacity: usize,
    pub occupied: usize,
    pub free: usize,
    pub fill_percent: f32,
    pub paused: bool,
    pub open: bool,
    pub seek_state: SeekState,
    pub offset: u64,
    pub total_written: u64,
    pub total_read: u64,
    /// Times the producer was resumed after a pause
    pub resume_count: u64,
}

/// Everything guarded by the stream mutex
#[derive(Debug)]
struct StreamState {
    buffer: InputBuffer,

    /// Producer is stopped because the buffer filled up
    paused: bool,

    /// Producer may still deliver bytes
    open: bool,

    /// Source finished opening (first data, or explicit `set_ready`)
    ready: bool,

    offset: u64,
    size: Option<u64>,
    seekable: bool,
    mime_type: Option<String>,

    seek_state: SeekState,
    seek_offset: u64,

    /// Outstanding seek has no waiter; its completion must not move `offset`
    seek_abandoned: bool,

    /// Internal seek back to `offset` after an abandoned one; reads wait for it
    realigning: bool,

    /// Most recent tag not yet taken by the consumer
    tag: Option<Tag>,

    postponed_error: Option<Arc<SourceError>>,
    /// Consumer has seen `postponed_error`; it is frozen from then on
    error_surfaced: bool,

    resume_count: u64,
}

impl StreamState {
    fn new(buffer_size: usize) -> Self {
        Self {
            buffer: InputBuffer::new(buffer_size),
            paused: false,
            open: true,
            ready: false,
            offset: 0,
            size: None,
            seekable: true,
            mime_type: None,
            seek_state: SeekState::None,
            seek_offset: 0,
            seek_abandoned: false,
            realigning: false,
            tag: None,
            postponed_error: None,
            error_surfaced: false,
            resume_count: 0,
        }
    }

    /// Surface the postponed error, if any
    fn check(&mut self) -> Result<()> {
        match self.postponed_error.clone() {
            Some(err) => {
                self.error_surfaced = true;
                self.open = false;
                Err(StreamError::Source(err))
            }
            None => Ok(()),
        }
    }

    /// Park a producer failure; returns false if an earlier one already surfaced
    fn postpone(&mut self, err: SourceError) -> bool {
        if self.error_surfaced {
            return false;
        }
        self.postponed_error = Some(Arc::new(err));
        true
    }

    fn postpone_logged(&mut self, id: Uuid, err: SourceError) -> bool {
        let message = err.to_string();
        if self.postpone(err) {
            warn!("Input stream {} postponed error: {}", id, message);
            true
        } else {
            debug!(
                "Input stream {} ignoring error after failure surfaced: {}",
                id, message
            );
            false
        }
    }

    /// Bytes can be handed to the reader without waiting
    fn is_readable(&self) -> bool {
        !self.realigning && (!self.buffer.is_empty() || self.is_eof())
    }

    fn is_eof(&self) -> bool {
        let past_end = self.size.is_some_and(|size| self.offset >= size);
        past_end || (!self.open && self.buffer.is_empty())
    }
}

/// Bridge between a non-blocking producer and a blocking consumer
pub struct AsyncInputStream {
    id: Uuid,
    uri: String,
    resume_at: usize,

    state: Mutex<StreamState>,
    /// Broadcast on every state change a waiter may care about
    cond: Condvar,

    event_loop: EventLoopHandle,
    deferred_resume: DeferredCall,
    deferred_seek: DeferredCall,

    source: Box<dyn AsyncSource>,
}

impl std::fmt::Debug for AsyncInputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncInputStream")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("resume_at", &self.resume_at)
            .field("event_loop", &self.event_loop)
            .finish_non_exhaustive()
    }
}

impl AsyncInputStream {
    /// Create a stream bound to `event_loop`
    ///
    /// The stream starts open, unpaused, seekable, with no tag and no error.
    /// Deferred resume/seek hold only a weak reference, so a stream that is
    /// dropped while one is queued simply skips it.
    pub fn new(
        uri: impl Into<String>,
        config: StreamConfig,
        event_loop: EventLoopHandle,
        source: Box<dyn AsyncSource>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let uri = uri.into();

        let stream = Arc::new_cyclic(|weak: &Weak<AsyncInputStream>| {
            let resume_target = weak.clone();
            let deferred_resume = DeferredCall::new(event_loop.clone(), "resume", move || {
                if let Some(stream) = resume_target.upgrade() {
                    stream.run_deferred_resume();
                }
            });

            let seek_target = weak.clone();
            let deferred_seek = DeferredCall::new(event_loop.clone(), "seek", move || {
                if let Some(stream) = seek_target.upgrade() {
                    stream.run_deferred_seek();
                }
            });

            Self {
                id: Uuid::new_v4(),
                uri,
                resume_at: config.resume_at,
                state: Mutex::new(StreamState::new(config.buffer_size)),
                cond: Condvar::new(),
                event_loop,
                deferred_resume,
                deferred_seek,
                source,
            }
        });

        info!(
            "Input stream {} opened: uri={}, buffer_size={}, resume_at={}",
            stream.id, stream.uri, config.buffer_size, config.resume_at
        );

        Ok(stream)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_loop(&self) -> &EventLoopHandle {
        &self.event_loop
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a notification, or report that `deadline` has already passed
    fn wait_on<'a>(
        &self,
        state: MutexGuard<'a, StreamState>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, StreamState>, bool) {
        match deadline {
            None => (
                self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                false,
            ),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return (state, true);
                }
                let (state, _) = self
                    .cond
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                (state, false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Producer side (event loop)
    // ------------------------------------------------------------------

    /// Free bytes in the buffer
    pub fn buffer_space(&self) -> usize {
        self.lock_state().buffer.space()
    }

    pub fn is_buffer_empty(&self) -> bool {
        self.lock_state().buffer.is_empty()
    }

    pub fn is_buffer_full(&self) -> bool {
        self.lock_state().buffer.is_full()
    }

    /// True while the producer should not deliver more data
    pub fn is_paused(&self) -> bool {
        self.lock_state().paused
    }

    /// True while a seek has been handed to the source and not yet completed
    pub fn is_seek_pending(&self) -> bool {
        self.lock_state().seek_state == SeekState::Pending
    }

    pub fn seek_state(&self) -> SeekState {
        self.lock_state().seek_state
    }

    /// Lock the stream and expose free buffer space as a writable slice
    ///
    /// The slice is the contiguous free run at the write position. It is
    /// empty when the buffer is full and may be shorter than
    /// [`AsyncInputStream::buffer_space`] when the free space wraps; commit
    /// and prepare again for the rest. The stream stays locked until the
    /// returned guard is committed or dropped.
    pub fn prepare_write_buffer(&self) -> WriteBuffer<'_> {
        let mut state = self.lock_state();
        state.buffer.prepare_region();
        WriteBuffer {
            stream: self,
            state,
        }
    }

    /// Copy `data` into the buffer
    ///
    /// # Panics
    /// If `data` is larger than the current free space. Sources must size
    /// their writes with [`AsyncInputStream::buffer_space`].
    pub fn append_to_buffer(&self, data: &[u8]) {
        let mut state = self.lock_state();
        let space = state.buffer.space();
        if data.len() > space {
            drop(state);
            panic!(
                "append of {} bytes exceeds free buffer space of {} bytes",
                data.len(),
                space
            );
        }
        let n = state.buffer.append(data);
        self.after_write(&mut state, n);
    }

    /// Flow control and wakeup after new bytes landed in the buffer
    fn after_write(&self, state: &mut StreamState, nbytes: usize) {
        if state.buffer.is_full() && !state.paused {
            state.paused = true;
            debug!(
                "Input stream {} buffer full ({} bytes), pausing producer",
                self.id,
                state.buffer.len()
            );
        }
        state.ready = true;
        trace!(
            "Input stream {} appended {} bytes (occupied={})",
            self.id,
            nbytes,
            state.buffer.len()
        );
        self.cond.notify_all();
    }

    /// Arm the deferred resume once the consumer drained enough
    fn after_drain(&self, state: &mut StreamState) {
        if !state.paused || state.buffer.len() > self.resume_at {
            return;
        }
        match self.deferred_resume.schedule() {
            Ok(true) => debug!(
                "Input stream {} drained to {} bytes, scheduling resume",
                self.id,
                state.buffer.len()
            ),
            Ok(false) => {}
            Err(e) => warn!("Input stream {} cannot schedule resume: {}", self.id, e),
        }
    }

    /// Replace the pending tag (`None` clears it)
    pub fn set_tag(&self, tag: Option<Tag>) {
        let mut state = self.lock_state();
        if let Some(tag) = &tag {
            debug!("Input stream {} received tag: {:?}", self.id, tag);
        }
        state.tag = tag;
        drop(state);
        self.cond.notify_all();
    }

    pub fn clear_tag(&self) {
        self.set_tag(None);
    }

    /// Producer will deliver no more bytes
    pub fn set_closed(&self) {
        let mut state = self.lock_state();
        if state.open {
            debug!(
                "Input stream {} closed by source ({} bytes still buffered)",
                self.id,
                state.buffer.len()
            );
        }
        state.open = false;
        state.ready = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Park a producer failure for the consumer
    ///
    /// Before the consumer has seen a failure, a newer one replaces the older.
    /// After that, further failures are ignored.
    pub fn post_error(&self, err: impl Into<SourceError>) {
        let err = err.into();
        let mut state = self.lock_state();
        if state.postpone_logged(self.id, err) {
            drop(state);
            self.cond.notify_all();
        }
    }

    /// Source finished repositioning to the requested offset
    ///
    /// Reopens the stream and moves the read position. Calling this with no
    /// seek outstanding is ignored.
    ///
    /// If the consumer gave up on the seek, the read position stays where it
    /// is. The source has moved to the abandoned target though, so the
    /// buffer is dropped and the source is sent back to the read position;
    /// reads wait until that completes.
    pub fn seek_done(&self) {
        let mut state = self.lock_state();
        if state.seek_state == SeekState::None {
            warn!("Input stream {} seek_done without outstanding seek", self.id);
            return;
        }

        if state.seek_abandoned {
            state.seek_abandoned = false;
            state.seek_state = SeekState::None;
            if state.postponed_error.is_none() {
                self.schedule_realign(&mut state);
            }
            drop(state);
            self.cond.notify_all();
            return;
        }

        state.open = true;
        state.offset = state.seek_offset;
        state.seek_state = SeekState::None;
        state.realigning = false;
        debug!("Input stream {} seek complete at {}", self.id, state.offset);
        drop(state);
        self.cond.notify_all();
    }

    /// Send the source back to the read position after an abandoned seek
    fn schedule_realign(&self, state: &mut StreamState) {
        let discarded = state.buffer.clear();
        state.seek_offset = state.offset;
        state.seek_state = SeekState::Scheduled;
        state.realigning = true;

        match self.deferred_seek.schedule() {
            Ok(_) => debug!(
                "Input stream {} late seek completion, realigning to {} ({} bytes dropped)",
                self.id, state.offset, discarded
            ),
            Err(e) => {
                state.seek_state = SeekState::None;
                state.realigning = false;
                state.postpone_logged(self.id, SourceError::Aborted(e.to_string()));
            }
        }
    }

    /// Consumer stops waiting for the outstanding seek
    ///
    /// A seek the source has not seen yet is withdrawn. One already handed to
    /// the source stays PENDING (the source is still repositioning) and is
    /// marked abandoned.
    fn abandon_seek(&self, state: &mut StreamState, offset: u64) {
        match state.seek_state {
            SeekState::Scheduled => {
                state.seek_state = SeekState::None;
                state.realigning = false;
                self.deferred_seek.cancel();
                debug!("Input stream {} seek to {} withdrawn", self.id, offset);
            }
            SeekState::Pending => {
                state.seek_abandoned = true;
                debug!(
                    "Input stream {} seek to {} abandoned while pending",
                    self.id, offset
                );
            }
            SeekState::None => {}
        }
    }

    /// Drop everything buffered, typically right before `seek_done`
    ///
    /// Re-evaluates flow control, so a paused producer gets a resume.
    pub fn discard_buffer(&self) {
        let mut state = self.lock_state();
        let discarded = state.buffer.clear();
        if discarded > 0 {
            debug!("Input stream {} discarded {} buffered bytes", self.id, discarded);
        }
        self.after_drain(&mut state);
    }

    /// Source finished opening without delivering data yet
    pub fn set_ready(&self) {
        let mut state = self.lock_state();
        state.ready = true;
        drop(state);
        self.cond.notify_all();
    }

    pub fn set_size(&self, size: Option<u64>) {
        self.lock_state().size = size;
    }

    /// Streams are seekable until the source says otherwise
    pub fn set_seekable(&self, seekable: bool) {
        self.lock_state().seekable = seekable;
    }

    pub fn set_mime_type(&self, mime_type: impl Into<String>) {
        self.lock_state().mime_type = Some(mime_type.into());
    }

    pub fn mime_type(&self) -> Option<String> {
        self.lock_state().mime_type.clone()
    }

    fn run_deferred_resume(self: Arc<Self>) {
        {
            let mut state = self.lock_state();
            if !state.paused {
                return;
            }
            state.paused = false;
            state.resume_count += 1;
            debug!(
                "Input stream {} resuming producer at {} bytes buffered",
                self.id,
                state.buffer.len()
            );
        }

        if let Err(e) = self.source.do_resume(&self) {
            self.post_error(e);
        }
    }

    fn run_deferred_seek(self: Arc<Self>) {
        let (offset, resume) = {
            let mut state = self.lock_state();
            if state.seek_state != SeekState::Scheduled {
                // Withdrawn after a timeout
                return;
            }
            let resume = state.paused;
            if resume {
                state.paused = false;
                state.resume_count += 1;
            }
            state.seek_state = SeekState::Pending;
            if state.realigning {
                // Anything pushed since the abandoned seek belongs to the wrong position
                state.buffer.clear();
            }
            (state.seek_offset, resume)
        };

        if resume {
            // The resume is folded into the seek
            self.deferred_resume.cancel();
            if let Err(e) = self.source.do_resume(&self) {
                self.abort_seek(e);
                return;
            }
        }

        debug!("Input stream {} seek pending: offset={}", self.id, offset);
        if let Err(e) = self.source.do_seek(&self, offset) {
            self.abort_seek(e);
        }
    }

    fn abort_seek(&self, err: SourceError) {
        let mut state = self.lock_state();
        warn!("Input stream {} seek failed: {}", self.id, err);
        state.seek_state = SeekState::None;
        state.seek_abandoned = false;
        state.realigning = false;
        state.postpone_logged(self.id, err);
        drop(state);
        self.cond.notify_all();
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.lock_state().ready
    }

    /// Block until the source is ready (or failed)
    pub fn wait_ready(&self) -> Result<()> {
        self.wait_ready_inner(None)
    }

    pub fn wait_ready_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_ready_inner(Some(timeout))
    }

    fn wait_ready_inner(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock_state();
        loop {
            state.check()?;
            if state.ready {
                return Ok(());
            }
            let (guard, timed_out) = self.wait_on(state, deadline);
            state = guard;
            if timed_out {
                return Err(StreamError::Timeout(timeout.unwrap_or_default()));
            }
        }
    }

    /// `read` with an upper bound on how long to wait for data
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.read_inner(buf, Some(timeout))
    }

    fn read_inner(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock_state();

        loop {
            state.check()?;
            if buf.is_empty() {
                return Ok(0);
            }
            if state.is_readable() {
                break;
            }
            let (guard, timed_out) = self.wait_on(state, deadline);
            state = guard;
            if timed_out {
                return Err(StreamError::Timeout(timeout.unwrap_or_default()));
            }
        }

        let n = state.buffer.read_into(buf);
        state.offset += n as u64;
        trace!(
            "Input stream {} read {} bytes (offset={}, occupied={})",
            self.id,
            n,
            state.offset,
            state.buffer.len()
        );
        self.after_drain(&mut state);
        Ok(n)
    }

    /// `seek` with an upper bound on how long to wait for completion
    ///
    /// A seek that times out before reaching the source is withdrawn. One
    /// that already reached the source is left to finish, but its completion
    /// no longer moves the read position.
    pub fn seek_timeout(&self, offset: u64, timeout: Duration) -> Result<()> {
        self.seek_inner(offset, Some(timeout))
    }

    fn seek_inner(&self, offset: u64, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock_state();

        state.check()?;
        if state.seek_state != SeekState::None {
            warn!(
                "Input stream {} rejected seek to {}: seek already {:?}",
                self.id, offset, state.seek_state
            );
            return Err(StreamError::SeekInProgress { offset });
        }
        if offset == state.offset {
            return Ok(());
        }
        if !state.seekable {
            return Err(StreamError::NotSeekable);
        }

        state.seek_offset = offset;
        state.seek_state = SeekState::Scheduled;
        if let Err(e) = self.deferred_seek.schedule() {
            state.seek_state = SeekState::None;
            return Err(e);
        }
        debug!(
            "Input stream {} seek scheduled: {} -> {}",
            self.id, state.offset, offset
        );

        while state.seek_state != SeekState::None && state.postponed_error.is_none() {
            let (guard, timed_out) = self.wait_on(state, deadline);
            state = guard;
            if timed_out {
                self.abandon_seek(&mut state, offset);
                return Err(StreamError::Timeout(timeout.unwrap_or_default()));
            }
        }

        if state.seek_state != SeekState::None {
            // Failed mid-seek
            self.abandon_seek(&mut state, offset);
        }
        state.check()
    }

    /// Snapshot of buffer and negotiation state
    pub fn stats(&self) -> InputStreamStats {
        let state = self.lock_state();
        InputStreamStats {
            capacity: state.buffer.capacity(),
            occupied: state.buffer.len(),
            free: state.buffer.space(),
            fill_percent: state.buffer.fill_percent(),
            paused: state.paused,
            open: state.open,
            seek_state: state.seek_state,
            offset: state.offset,
            total_written: state.buffer.total_written(),
            total_read: state.buffer.total_read(),
            resume_count: state.resume_count,
        }
    }
}

impl InputStream for AsyncInputStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn check(&self) -> Result<()> {
        self.lock_state().check()
    }

    fn is_eof(&self) -> bool {
        self.lock_state().is_eof()
    }

    fn seek(&self, offset: u64) -> Result<()> {
        self.seek_inner(offset, None)
    }

    fn read_tag(&self) -> Result<Option<Tag>> {
        let mut state = self.lock_state();
        state.check()?;
        Ok(state.tag.take())
    }

    fn is_available(&self) -> Result<bool> {
        let mut state = self.lock_state();
        state.check()?;
        Ok(state.tag.is_some() || state.is_readable())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_inner(buf, None)
    }

    fn offset(&self) -> u64 {
        self.lock_state().offset
    }

    fn size(&self) -> Option<u64> {
        self.lock_state().size
    }

    fn is_seekable(&self) -> bool {
        self.lock_state().seekable
    }
}

impl Drop for AsyncInputStream {
    fn drop(&mut self) {
        self.deferred_resume.cancel_blocking();
        self.deferred_seek.cancel_blocking();

        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        info!(
            "Input stream {} dropped: offset={}, unread={} bytes, seek_state={:?}",
            self.id,
            state.offset,
            state.buffer.len(),
            state.seek_state
        );
    }
}

/// Locked writable view into the buffer's storage
///
/// Fill any prefix and call [`WriteBuffer::commit`]. Dropping the guard
/// without committing publishes nothing.
pub struct WriteBuffer<'a> {
    stream: &'a AsyncInputStream,
    state: MutexGuard<'a, StreamState>,
}

impl WriteBuffer<'_> {
    /// Publish the first `nbytes` of the region
    ///
    /// # Panics
    /// If `nbytes` exceeds the region length.
    pub fn commit(mut self, nbytes: usize) {
        let prepared = self.len();
        if nbytes > prepared {
            drop(self);
            panic!(
                "commit of {} bytes exceeds prepared write region of {} bytes",
                nbytes, prepared
            );
        }
        let n = self.state.buffer.commit_region(nbytes);
        self.stream.after_write(&mut self.state, n);
    }
}

impl Deref for WriteBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.state.buffer.region()
    }
}

impl DerefMut for WriteBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.state.buffer.write_region()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::tag::TagType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Counts resumes; completes seeks immediately
    #[derive(Default)]
    struct CountingSource {
        resumes: Arc<AtomicUsize>,
    }

    impl AsyncSource for CountingSource {
        fn do_resume(
            &self,
            _stream: &Arc<AsyncInputStream>,
        ) -> std::result::Result<(), SourceError> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn do_seek(
            &self,
            stream: &Arc<AsyncInputStream>,
            _offset: u64,
        ) -> std::result::Result<(), SourceError> {
            stream.discard_buffer();
            stream.seek_done();
            Ok(())
        }
    }

    fn open(
        event_loop: &EventLoop,
        buffer_size: usize,
        resume_at: usize,
    ) -> (Arc<AsyncInputStream>, Arc<AtomicUsize>) {
        let resumes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            resumes: Arc::clone(&resumes),
        };
        let stream = AsyncInputStream::new(
            "test://stream",
            StreamConfig::new(buffer_size, resume_at).unwrap(),
            event_loop.handle(),
            Box::new(source),
        )
        .unwrap();
        (stream, resumes)
    }

    /// Wait until everything queued on the loop so far has run
    fn flush(event_loop: &EventLoop) {
        event_loop.handle().call_blocking(|| ()).unwrap();
    }

    #[test]
    fn test_config_validation() {
        assert!(StreamConfig::new(1024, 512).is_ok());
        assert!(matches!(
            StreamConfig::new(0, 0),
            Err(StreamError::InvalidConfig(_))
        ));
        assert!(matches!(
            StreamConfig::new(1024, 1024),
            Err(StreamError::InvalidConfig(_))
        ));
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_initial_state() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        assert_eq!(stream.uri(), "test://stream");
        assert!(stream.is_buffer_empty());
        assert!(!stream.is_paused());
        assert!(stream.is_seekable());
        assert!(!stream.is_eof());
        assert_eq!(stream.offset(), 0);
        assert_eq!(stream.size(), None);
        assert_eq!(stream.seek_state(), SeekState::None);
        assert!(stream.check().is_ok());
        assert!(!stream.is_available().unwrap());
    }

    #[test]
    fn test_fill_pauses_and_drain_resumes_once() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, resumes) = open(&event_loop, 1024, 512);

        stream.append_to_buffer(&[7u8; 1024]);
        assert!(stream.is_buffer_full());
        assert!(stream.is_paused());

        let mut buf = [0u8; 600];
        assert_eq!(stream.read(&mut buf).unwrap(), 600);
        assert_eq!(stream.stats().occupied, 424);

        flush(&event_loop);
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
        assert!(!stream.is_paused());
        assert_eq!(stream.stats().resume_count, 1);
    }

    #[test]
    fn test_no_resume_above_threshold() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, resumes) = open(&event_loop, 1024, 512);

        stream.append_to_buffer(&[0u8; 1024]);
        let mut buf = [0u8; 100];
        stream.read(&mut buf).unwrap();

        flush(&event_loop);
        assert_eq!(resumes.load(Ordering::SeqCst), 0);
        assert!(stream.is_paused());
    }

    #[test]
    fn test_repeated_drain_schedules_single_resume() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, resumes) = open(&event_loop, 1024, 512);

        // Hold the loop so the resume cannot run between reads
        let (release_tx, release_rx) = mpsc::channel::<()>();
        event_loop
            .handle()
            .post(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        stream.append_to_buffer(&[0u8; 1024]);
        let mut buf = [0u8; 300];
        stream.read(&mut buf).unwrap();
        stream.read(&mut buf).unwrap();
        stream.read(&mut buf).unwrap();

        release_tx.send(()).unwrap();
        flush(&event_loop);
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_buffer_commit_prefix() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 16, 8);

        {
            let mut region = stream.prepare_write_buffer();
            assert_eq!(region.len(), 16);
            region[..5].copy_from_slice(b"hello");
            region.commit(5);
        }

        assert_eq!(stream.buffer_space(), 11);
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(stream.offset(), 5);
    }

    #[test]
    #[should_panic(expected = "exceeds prepared write region")]
    fn test_commit_past_region_panics() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 8, 4);
        stream.prepare_write_buffer().commit(9);
    }

    #[test]
    #[should_panic(expected = "exceeds free buffer space")]
    fn test_append_overflow_panics() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 8, 4);
        stream.append_to_buffer(&[0u8; 9]);
    }

    #[test]
    fn test_tag_is_taken_once_and_latest_wins() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.set_tag(Some(Tag::new().with(TagType::Title, "old")));
        stream.set_tag(Some(Tag::new().with(TagType::Title, "new")));
        assert!(stream.is_available().unwrap());

        let tag = stream.read_tag().unwrap().unwrap();
        assert_eq!(tag.get(TagType::Title), Some("new"));
        assert!(stream.read_tag().unwrap().is_none());

        stream.set_tag(Some(Tag::new()));
        stream.clear_tag();
        assert!(stream.read_tag().unwrap().is_none());
    }

    #[test]
    fn test_postponed_error_is_sticky() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.append_to_buffer(b"data");
        stream.post_error(SourceError::Protocol("first".into()));
        stream.post_error(SourceError::Protocol("second".into()));

        // Buffered data is not delivered once a failure is pending
        let mut buf = [0u8; 4];
        let first = match stream.read(&mut buf) {
            Err(StreamError::Source(err)) => err,
            other => panic!("expected source error, got {:?}", other),
        };
        assert_eq!(first.to_string(), "Protocol error: second");

        stream.post_error(SourceError::Protocol("third".into()));
        let again = match stream.check() {
            Err(StreamError::Source(err)) => err,
            other => panic!("expected source error, got {:?}", other),
        };
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!stream.stats().open);
    }

    #[test]
    fn test_closed_drains_then_eof() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.append_to_buffer(b"tail");
        stream.set_closed();
        assert!(!stream.is_eof());

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert!(stream.is_eof());
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.is_available().unwrap());
    }

    #[test]
    fn test_known_size_reaches_eof() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.set_size(Some(4));
        stream.append_to_buffer(b"abcd");
        let mut buf = [0u8; 4];
        stream.read(&mut buf).unwrap();
        assert!(stream.is_eof());
    }

    #[test]
    fn test_read_timeout_expires_without_data() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        let mut buf = [0u8; 4];
        let result = stream.read_timeout(&mut buf, Duration::from_millis(20));
        assert!(matches!(result, Err(StreamError::Timeout(_))));
    }

    #[test]
    fn test_empty_read_returns_zero() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        assert_eq!(stream.read(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_seek_to_current_offset_is_noop() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.seek(0).unwrap();
        assert_eq!(stream.seek_state(), SeekState::None);
    }

    #[test]
    fn test_seek_not_seekable() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.set_seekable(false);
        assert!(matches!(stream.seek(10), Err(StreamError::NotSeekable)));
        assert_eq!(stream.seek_state(), SeekState::None);
    }

    #[test]
    fn test_seek_completes_and_moves_offset() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 64, 32);

        stream.append_to_buffer(b"stale");
        stream.set_closed();
        stream.seek(2000).unwrap();

        assert_eq!(stream.offset(), 2000);
        assert!(stream.is_buffer_empty());
        assert!(stream.stats().open);
        assert!(!stream.is_eof());
    }

    #[test]
    fn test_seek_while_paused_resumes_first() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, resumes) = open(&event_loop, 32, 16);

        stream.append_to_buffer(&[1u8; 32]);
        assert!(stream.is_paused());

        stream.seek(100).unwrap();
        flush(&event_loop);
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
        assert!(!stream.is_paused());
    }

    #[test]
    fn test_stats_snapshot() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, _) = open(&event_loop, 100, 50);

        stream.append_to_buffer(&[0u8; 40]);
        let mut buf = [0u8; 10];
        stream.read(&mut buf).unwrap();

        let stats = stream.stats();
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.occupied, 30);
        assert_eq!(stats.free, 70);
        assert_eq!(stats.fill_percent, 30.0);
        assert_eq!(stats.total_written, 40);
        assert_eq!(stats.total_read, 10);
        assert_eq!(stats.offset, 10);
        assert!(!stats.paused);
    }

    #[test]
    fn test_drop_with_queued_resume_is_safe() {
        let event_loop = EventLoop::start("test-io").unwrap();
        let (stream, resumes) = open(&event_loop, 16, 8);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        event_loop
            .handle()
            .post(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        stream.append_to_buffer(&[0u8; 16]);
        let mut buf = [0u8; 16];
        stream.read(&mut buf).unwrap();
        drop(stream);

        release_tx.send(()).unwrap();
        flush(&event_loop);
        assert_eq!(resumes.load(Ordering::SeqCst), 0);
    }
}

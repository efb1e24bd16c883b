//! Local file source
//!
//! Reads the file in `chunk_size` pieces on the event loop. Each pump reads
//! at most one chunk and reschedules itself, so resume and seek requests
//! queued behind it get a turn.

use crate::async_stream::{AsyncInputStream, AsyncSource, StreamConfig};
use crate::error::{Result, SourceError, StreamError};
use crate::event_loop::EventLoopHandle;
use crate::tag::{Tag, TagType};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

struct FileShared {
    path: PathBuf,
    file: Mutex<File>,
    chunk_size: usize,

    /// A pump job is queued on the loop
    pump_scheduled: AtomicBool,
}

impl FileShared {
    fn lock_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_pump(self: &Arc<Self>, stream: &Arc<AsyncInputStream>) {
        if self.pump_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = Arc::clone(self);
        let target = Arc::downgrade(stream);
        let posted = stream.event_loop().post(move || {
            shared.pump_scheduled.store(false, Ordering::Release);
            if let Some(stream) = target.upgrade() {
                shared.pump(&stream);
            }
        });

        if let Err(e) = posted {
            self.pump_scheduled.store(false, Ordering::Release);
            stream.post_error(SourceError::Aborted(e.to_string()));
        }
    }

    fn pump(self: &Arc<Self>, stream: &Arc<AsyncInputStream>) {
        if stream.is_paused() || stream.is_seek_pending() {
            return;
        }
        let space = stream.buffer_space();
        if space == 0 {
            return;
        }

        let mut chunk = vec![0u8; self.chunk_size.min(space)];
        let result = self.lock_file().read(&mut chunk);
        match result {
            Ok(0) => {
                debug!("Reached end of {}", self.path.display());
                stream.set_closed();
            }
            Ok(n) => {
                trace!("Read {} bytes from {}", n, self.path.display());
                stream.append_to_buffer(&chunk[..n]);
                if !stream.is_paused() {
                    self.schedule_pump(stream);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => self.schedule_pump(stream),
            Err(e) => stream.post_error(e),
        }
    }
}

/// [`AsyncSource`] backed by a local file
pub struct FileSource {
    shared: Arc<FileShared>,
}

impl FileSource {
    /// Open `path` and start streaming it into a new bridge
    ///
    /// The returned stream knows its size and MIME type (by extension), is
    /// seekable and carries a tag with the file name.
    pub fn open(
        path: impl AsRef<Path>,
        event_loop: EventLoopHandle,
        config: StreamConfig,
        chunk_size: usize,
    ) -> Result<Arc<AsyncInputStream>> {
        if chunk_size == 0 {
            return Err(StreamError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }

        let path = path.as_ref();
        let file = File::open(path).map_err(SourceError::from)?;
        let size = file.metadata().map_err(SourceError::from)?.len();

        let shared = Arc::new(FileShared {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            chunk_size,
            pump_scheduled: AtomicBool::new(false),
        });

        let source = FileSource {
            shared: Arc::clone(&shared),
        };
        let uri = format!("file://{}", path.display());
        let stream = AsyncInputStream::new(uri, config, event_loop, Box::new(source))?;

        stream.set_size(Some(size));
        stream.set_seekable(true);
        if let Some(mime) = super::mime_type_for_path(path) {
            stream.set_mime_type(mime);
        }
        if let Some(name) = path.file_name() {
            stream.set_tag(Some(
                Tag::new().with(TagType::Name, name.to_string_lossy()),
            ));
        }
        stream.set_ready();

        info!("Streaming {} ({} bytes)", path.display(), size);
        shared.schedule_pump(&stream);

        Ok(stream)
    }
}

impl AsyncSource for FileSource {
    fn do_resume(&self, stream: &Arc<AsyncInputStream>) -> std::result::Result<(), SourceError> {
        self.shared.schedule_pump(stream);
        Ok(())
    }

    fn do_seek(
        &self,
        stream: &Arc<AsyncInputStream>,
        offset: u64,
    ) -> std::result::Result<(), SourceError> {
        self.shared.lock_file().seek(SeekFrom::Start(offset))?;
        stream.discard_buffer();
        stream.seek_done();
        self.shared.schedule_pump(stream);
        Ok(())
    }
}

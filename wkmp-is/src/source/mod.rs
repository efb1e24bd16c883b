//! Producer implementations
//!
//! Sources run on the event loop and feed an [`AsyncInputStream`](crate::AsyncInputStream)
//! through its producer API.

mod file;

pub use file::FileSource;

use std::path::Path;

/// Guess a MIME type from the file extension
pub fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        _ => return None,
    };
    Some(mime)
}

//! Stream metadata tags
//!
//! A [`Tag`] is produced on the I/O thread (e.g. from in-band stream titles)
//! and handed to the consumer via `read_tag()`. The bridge treats it as an
//! opaque value: it only stores, replaces and moves it.

use std::time::Duration;

/// Kind of a single tag item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    Artist,
    Title,
    Album,
    /// Station or stream name
    Name,
    Genre,
    Comment,
    TrackNumber,
    Date,
}

/// Single key/value tag entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagItem {
    pub kind: TagType,
    pub value: String,
}

/// Metadata snapshot for a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// Duration of the song, if known
    pub duration: Option<Duration>,

    /// Tag items in insertion order (repeats allowed)
    pub items: Vec<TagItem>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item (builder style)
    pub fn with(mut self, kind: TagType, value: impl Into<String>) -> Self {
        self.items.push(TagItem {
            kind,
            value: value.into(),
        });
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// First value of the given kind
    pub fn get(&self, kind: TagType) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| item.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_none() && self.items.is_empty()
    }
}

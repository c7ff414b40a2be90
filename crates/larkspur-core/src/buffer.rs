use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::format::Format;

/// Provenance annotation attached to a buffer when the graph dispatches
/// it from a producing element to its destination port. Downstream
/// elements can inspect the tags to learn which element produced the
/// buffer and whether that producer has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoTag {
    pub element_name: String,
    pub element_id: String,
    pub source: bool,
    pub source_done: bool,
}

/// Guard word placed beyond the payload capacity of every buffer.
/// Checked when the buffer is dropped in debug builds.
const CANARY: [u8; 4] = 0xF4F5_ABCDu32.to_le_bytes();

/// A chunk of audio data flowing through the graph.
///
/// The buffer owns a byte region and carries the PCM [`Format`] of its
/// contents (meaningful only when the contents are PCM) together with a
/// sequence of [`InfoTag`]s. The payload length can be trimmed with
/// [`Buffer::set_byte_size`] without reallocation.
#[derive(Debug, Clone)]
pub struct Buffer {
    format: Format,
    data: Vec<u8>,
    len: usize,
    tags: SmallVec<[InfoTag; 2]>,
}

impl Buffer {
    /// Create a buffer able to hold `bytes` bytes of payload. The payload
    /// size is initially the full capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        let mut data = vec![0u8; bytes + CANARY.len()];
        data[bytes..].copy_from_slice(&CANARY);
        Self {
            format: Format::default(),
            data,
            len: bytes,
            tags: SmallVec::new(),
        }
    }

    /// The maximum payload size in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len() - CANARY.len()
    }

    /// The current payload size in bytes. The canary region is never
    /// part of the payload.
    pub fn byte_size(&self) -> usize {
        self.len
    }

    /// Trim (or grow back up to capacity) the payload size.
    pub fn set_byte_size(&mut self, bytes: usize) {
        assert!(bytes <= self.capacity());
        self.len = bytes;
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn add_info_tag(&mut self, tag: InfoTag) {
        self.tags.push(tag);
    }

    pub fn info_tags(&self) -> &[InfoTag] {
        &self.tags
    }

    pub fn clear_info_tags(&mut self) {
        self.tags.clear();
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let cap = self.data.len() - CANARY.len();
            assert!(
                self.data[cap..] == CANARY,
                "audio buffer out of bounds write detected"
            );
        }
    }
}

/// Shared-ownership handle to a [`Buffer`].
///
/// Multiple readers may hold the same buffer during an evaluation tick.
/// Producers mutate through [`Arc::make_mut`] before handing the buffer
/// off, so a handle that is still shared (e.g. with the PCM cache) is
/// copied on write instead of being clobbered.
pub type BufferHandle = Arc<Buffer>;

/// Allocates audio buffers, keeping a free list of returned buffers
/// keyed by their byte capacity.
///
/// The allocator belongs to a single graph worker and is never shared
/// across threads.
#[derive(Default)]
pub struct BufferAllocator {
    pool: AHashMap<usize, Vec<Buffer>>,
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a writable buffer with a payload of exactly `bytes` bytes,
    /// reusing a pooled buffer when one of the right capacity exists.
    pub fn allocate(&mut self, bytes: usize) -> BufferHandle {
        if let Some(pool) = self.pool.get_mut(&bytes) {
            if let Some(mut buffer) = pool.pop() {
                buffer.set_byte_size(bytes);
                buffer.set_format(Format::default());
                buffer.clear_info_tags();
                return Arc::new(buffer);
            }
        }
        Arc::new(Buffer::with_capacity(bytes))
    }

    /// Return a consumed buffer to the pool. Buffers still shared with
    /// other handles are simply dropped from this side.
    pub fn recycle(&mut self, handle: BufferHandle) {
        if let Some(mut buffer) = Arc::into_inner(handle) {
            buffer.clear_info_tags();
            self.pool
                .entry(buffer.capacity())
                .or_default()
                .push(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleType;

    #[test]
    fn payload_excludes_canary() {
        let mut buffer = Buffer::with_capacity(64);
        assert_eq!(buffer.byte_size(), 64);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.as_bytes().len(), 64);

        buffer.set_byte_size(10);
        assert_eq!(buffer.byte_size(), 10);
        assert_eq!(buffer.as_bytes_mut().len(), 10);
    }

    #[test]
    fn info_tags_append() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.add_info_tag(InfoTag {
            element_name: "src".into(),
            element_id: "1".into(),
            source: true,
            source_done: false,
        });
        buffer.add_info_tag(InfoTag {
            element_name: "gain".into(),
            element_id: "2".into(),
            ..Default::default()
        });
        assert_eq!(buffer.info_tags().len(), 2);
        assert_eq!(buffer.info_tags()[0].element_name, "src");
        assert!(buffer.info_tags()[0].source);
    }

    #[test]
    fn allocator_reuses_recycled_buffers() {
        let mut allocator = BufferAllocator::new();
        let mut handle = allocator.allocate(128);
        {
            let buffer = Arc::make_mut(&mut handle);
            buffer.set_format(Format::new(SampleType::Int16, 8000, 1));
            buffer.add_info_tag(InfoTag::default());
        }
        allocator.recycle(handle);

        let handle = allocator.allocate(128);
        assert_eq!(handle.byte_size(), 128);
        assert_eq!(handle.format(), Format::default());
        assert!(handle.info_tags().is_empty());
    }

    #[test]
    fn shared_handles_are_not_pooled() {
        let mut allocator = BufferAllocator::new();
        let handle = allocator.allocate(32);
        let other = handle.clone();
        allocator.recycle(handle);
        // the pool must not have taken the buffer while `other` lives.
        assert_eq!(other.byte_size(), 32);
    }

    #[test]
    fn copy_on_write_when_shared() {
        let mut allocator = BufferAllocator::new();
        let mut handle = allocator.allocate(4);
        let shared = handle.clone();
        Arc::make_mut(&mut handle).as_bytes_mut()[0] = 0xFF;
        assert_eq!(shared.as_bytes()[0], 0);
        assert_eq!(handle.as_bytes()[0], 0xFF);
    }
}

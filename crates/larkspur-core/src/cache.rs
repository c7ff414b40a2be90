use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::format::Format;

/// Result of probing an audio file without decoding it fully.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FileInfo {
    pub channels: u32,
    pub frames: u64,
    pub sample_rate: u32,
    pub seconds: f32,
    /// File size (compressed) in bytes.
    pub bytes: u64,
}

/// Fully decoded PCM contents of an audio file, shared between file
/// source instances pointing at the same URI.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub format: Format,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct Caches {
    pcm: AHashMap<String, Arc<PcmBuffer>>,
    info: AHashMap<String, FileInfo>,
    file: AHashMap<String, Arc<Vec<u8>>>,
}

/// Shared decoded-PCM and file-info caches.
///
/// The handle is cheap to clone; the engine owns one instance and passes
/// it down to file sources through the prepare parameters. Entries are
/// never evicted except by [`AudioCaches::clear`].
#[derive(Default, Clone)]
pub struct AudioCaches {
    inner: Arc<Mutex<Caches>>,
}

impl AudioCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_pcm_buffer(&self, uri: &str) -> Option<Arc<PcmBuffer>> {
        self.inner.lock().unwrap().pcm.get(uri).cloned()
    }

    pub fn store_pcm_buffer(&self, uri: &str, buffer: Arc<PcmBuffer>) {
        self.inner
            .lock()
            .unwrap()
            .pcm
            .insert(uri.to_owned(), buffer);
    }

    pub fn find_file_info(&self, uri: &str) -> Option<FileInfo> {
        self.inner.lock().unwrap().info.get(uri).copied()
    }

    pub fn store_file_info(&self, uri: &str, info: FileInfo) {
        self.inner
            .lock()
            .unwrap()
            .info
            .insert(uri.to_owned(), info);
    }

    pub fn find_file_buffer(&self, uri: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().unwrap().file.get(uri).cloned()
    }

    pub fn store_file_buffer(&self, uri: &str, data: Arc<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .file
            .insert(uri.to_owned(), data);
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut caches = self.inner.lock().unwrap();
        caches.pcm.clear();
        caches.info.clear();
        caches.file.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleType;

    #[test]
    fn pcm_entries_are_shared() {
        let caches = AudioCaches::new();
        assert!(caches.find_pcm_buffer("music.wav").is_none());

        let buffer = Arc::new(PcmBuffer {
            format: Format::new(SampleType::Int16, 44100, 2),
            data: vec![0; 16],
        });
        caches.store_pcm_buffer("music.wav", buffer.clone());

        let other = caches.clone();
        let hit = other.find_pcm_buffer("music.wav").unwrap();
        assert!(Arc::ptr_eq(&hit, &buffer));

        caches.clear();
        assert!(other.find_pcm_buffer("music.wav").is_none());
    }
}

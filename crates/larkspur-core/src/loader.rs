use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::PathBuf;

/// A readable, seekable byte stream resolved from a content URI.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceStream for T {}

/// Resolves content URIs to byte streams on behalf of elements that do
/// I/O during preparation (file sources).
pub trait Loader: Send + Sync {
    fn open_audio_stream(&self, uri: &str) -> io::Result<Box<dyn SourceStream>>;
}

/// Loader that maps URIs directly onto the filesystem, optionally
/// relative to a root directory.
#[derive(Debug, Default, Clone)]
pub struct FileLoader {
    root: Option<PathBuf>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl Loader for FileLoader {
    fn open_audio_stream(&self, uri: &str) -> io::Result<Box<dyn SourceStream>> {
        let path = match &self.root {
            Some(root) => root.join(uri),
            None => PathBuf::from(uri),
        };
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

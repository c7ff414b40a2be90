pub mod buffer;
pub mod cache;
pub mod decoder;
pub mod dsp;
pub mod element;
pub mod format;
pub mod loader;
pub mod port;

mod hash;
mod ids;

pub use buffer::{Buffer, BufferAllocator, BufferHandle, InfoTag};
pub use cache::{AudioCaches, FileInfo, PcmBuffer};
pub use decoder::{Decoder, DecoderError, DecoderInfo};
pub use element::{
    Command, EffectKind, Element, ElementEvent, EventQueue, MixerEffect, PrepareParams,
};
pub use format::{Format, SampleType};
pub use hash::hash_combine;
pub use ids::random_string;
pub use loader::{FileLoader, Loader, SourceStream};
pub use port::{Port, PortControlMessage, PortDesc};

#[cfg(feature = "wav")]
pub use decoder::wav::WavDecoder;

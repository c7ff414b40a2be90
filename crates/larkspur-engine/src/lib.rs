mod engine;

pub use engine::{AudioEngine, AudioEvent, GraphHandle, MusicEvent, MusicEventKind};

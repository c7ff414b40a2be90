pub mod graph;
pub mod graph_class;
pub mod graph_source;
pub mod player;
pub mod source;
pub mod thread_proxy;

pub use graph::{Graph, GraphError};
pub use graph_class::{ClassError, GraphClass, GraphLink, PreloadParams};
pub use graph_source::AudioGraphSource;
pub use player::{
    Device, DeviceStream, NullDevice, Player, PlayerError, PlayerEvent, StreamState, TrackStatus,
};
pub use source::{Source, SourceCommand, SourceError};
pub use thread_proxy::ThreadProxySource;

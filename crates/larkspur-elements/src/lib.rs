//! The built-in audio processing elements.
//!
//! Every element here conforms to the [`larkspur_core::Element`]
//! contract and can be instantiated declaratively through the
//! [`descriptor`] factory.

pub mod descriptor;
pub mod effect;
pub mod file_source;
pub mod gain;
pub mod mixer;
pub mod mixer_source;
pub mod null;
pub mod playlist;
pub mod queue;
pub mod sine_source;
pub mod splitter;
pub mod stereo_maker;
pub mod zero_source;

pub use descriptor::{
    create_element, find_element_desc, list_audio_elements, ElementArg, ElementCreateArgs,
    ElementDesc,
};
pub use effect::Effect;
pub use file_source::{FileSource, IOStrategy};
pub use gain::Gain;
pub use mixer::Mixer;
pub use mixer_source::{FadeIn, FadeOut, MixerSource};
pub use null::Null;
pub use playlist::Playlist;
pub use queue::Queue;
pub use sine_source::SineSource;
pub use splitter::Splitter;
pub use stereo_maker::{StereoChannel, StereoMaker};
pub use zero_source::ZeroSource;

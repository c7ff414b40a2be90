//! Declarative element descriptions and the element factory.
//!
//! Each element type publishes a descriptor: its default ports and its
//! argument schema. The schema doubles as the parsing template when a
//! graph class is read back from JSON, and the factory turns
//! [`ElementCreateArgs`] into live elements.

use std::hash::{Hash, Hasher};

use ahash::AHashMap;

use larkspur_core::{EffectKind, Element, Format, PortDesc, SampleType};

use crate::{
    Effect, FileSource, Gain, IOStrategy, Mixer, Null, Playlist, Queue, SineSource, Splitter,
    StereoChannel, StereoMaker, ZeroSource,
};

/// A single element argument value: a tagged union over the closed set
/// of argument types the elements understand.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementArg {
    String(String),
    Float(f32),
    U32(u32),
    Bool(bool),
    SampleType(SampleType),
    Format(Format),
    IOStrategy(IOStrategy),
    StereoChannel(StereoChannel),
    EffectKind(EffectKind),
}

impl Hash for ElementArg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::String(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::U32(v) => v.hash(state),
            Self::Bool(v) => v.hash(state),
            Self::SampleType(v) => v.hash(state),
            Self::Format(v) => v.hash(state),
            Self::IOStrategy(v) => v.hash(state),
            Self::StereoChannel(v) => v.hash(state),
            Self::EffectKind(v) => v.hash(state),
        }
    }
}

impl ElementArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sample_type(&self) -> Option<SampleType> {
        match self {
            Self::SampleType(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_format(&self) -> Option<Format> {
        match self {
            Self::Format(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_io_strategy(&self) -> Option<IOStrategy> {
        match self {
            Self::IOStrategy(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_stereo_channel(&self) -> Option<StereoChannel> {
        match self {
            Self::StereoChannel(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_effect_kind(&self) -> Option<EffectKind> {
        match self {
            Self::EffectKind(v) => Some(*v),
            _ => None,
        }
    }
}

/// Static description of an element type: its default ports and its
/// argument schema with default values.
#[derive(Debug, Clone, Default)]
pub struct ElementDesc {
    pub input_ports: Vec<PortDesc>,
    pub output_ports: Vec<PortDesc>,
    pub args: AHashMap<String, ElementArg>,
}

/// Everything needed to instantiate one element of a graph class.
#[derive(Debug, Clone, Default)]
pub struct ElementCreateArgs {
    pub id: String,
    pub name: String,
    /// The element type string, e.g. "Gain".
    pub kind: String,
    pub args: AHashMap<String, ElementArg>,
    pub input_ports: Vec<PortDesc>,
    pub output_ports: Vec<PortDesc>,
}

fn ports(names: &[&str]) -> Vec<PortDesc> {
    names.iter().map(|name| PortDesc::new(*name)).collect()
}

fn args(entries: &[(&str, ElementArg)]) -> AHashMap<String, ElementArg> {
    entries
        .iter()
        .map(|(name, value)| ((*name).to_owned(), value.clone()))
        .collect()
}

/// Look up the descriptor for an element type. Returns None for types
/// that cannot be created declaratively.
pub fn find_element_desc(kind: &str) -> Option<ElementDesc> {
    let desc = match kind {
        "ZeroSource" => ElementDesc {
            input_ports: Vec::new(),
            output_ports: ports(&["out"]),
            args: args(&[(
                "format",
                ElementArg::Format(Format::new(SampleType::Float32, 44100, 2)),
            )]),
        },
        "SineSource" => ElementDesc {
            input_ports: Vec::new(),
            output_ports: ports(&["out"]),
            args: args(&[
                (
                    "format",
                    ElementArg::Format(Format::new(SampleType::Float32, 44100, 2)),
                ),
                ("frequency", ElementArg::U32(440)),
                ("duration", ElementArg::U32(0)),
            ]),
        },
        "FileSource" => ElementDesc {
            input_ports: Vec::new(),
            output_ports: ports(&["out"]),
            args: args(&[
                ("file", ElementArg::String(String::new())),
                ("type", ElementArg::SampleType(SampleType::Int16)),
                ("loops", ElementArg::U32(1)),
                ("pcm_caching", ElementArg::Bool(false)),
                ("file_caching", ElementArg::Bool(false)),
                ("io_strategy", ElementArg::IOStrategy(IOStrategy::Default)),
            ]),
        },
        "Gain" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: ports(&["out"]),
            args: args(&[("gain", ElementArg::Float(1.0))]),
        },
        "Effect" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: ports(&["out"]),
            args: args(&[
                ("time", ElementArg::U32(0)),
                ("duration", ElementArg::U32(0)),
                ("effect", ElementArg::EffectKind(EffectKind::FadeIn)),
            ]),
        },
        "StereoMaker" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: ports(&["out"]),
            args: args(&[("channel", ElementArg::StereoChannel(StereoChannel::Left))]),
        },
        "Mixer" => ElementDesc {
            input_ports: ports(&["in0", "in1"]),
            output_ports: ports(&["out"]),
            args: AHashMap::new(),
        },
        "Queue" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: ports(&["out"]),
            args: AHashMap::new(),
        },
        "Null" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: Vec::new(),
            args: AHashMap::new(),
        },
        "Splitter" => ElementDesc {
            input_ports: ports(&["in"]),
            output_ports: ports(&["out0", "out1"]),
            args: AHashMap::new(),
        },
        "Playlist" => ElementDesc {
            input_ports: ports(&["in0", "in1"]),
            output_ports: ports(&["out"]),
            args: AHashMap::new(),
        },
        _ => return None,
    };
    Some(desc)
}

/// The element types the factory can create.
pub fn list_audio_elements() -> Vec<&'static str> {
    vec![
        "ZeroSource",
        "SineSource",
        "FileSource",
        "Gain",
        "Effect",
        "StereoMaker",
        "Mixer",
        "Queue",
        "Null",
        "Splitter",
        "Playlist",
    ]
}

/// Instantiate an element from its creation args. Unknown types yield
/// None.
pub fn create_element(create: &ElementCreateArgs) -> Option<Box<dyn Element>> {
    let name = create.name.clone();
    let id = create.id.clone();
    let arg = |key: &str| create.args.get(key);

    let element: Box<dyn Element> = match create.kind.as_str() {
        "ZeroSource" => {
            let format = arg("format").and_then(ElementArg::as_format)?;
            Box::new(ZeroSource::with_id(name, id, format))
        }
        "SineSource" => {
            let format = arg("format").and_then(ElementArg::as_format)?;
            let frequency = arg("frequency").and_then(ElementArg::as_u32).unwrap_or(440);
            let duration = arg("duration").and_then(ElementArg::as_u32).unwrap_or(0);
            Box::new(SineSource::with_id(name, id, format, frequency, duration))
        }
        "FileSource" => {
            let file = arg("file").and_then(ElementArg::as_str).unwrap_or_default();
            let mut source = FileSource::with_id(name, id, file);
            if let Some(sample_type) = arg("type").and_then(ElementArg::as_sample_type) {
                source.set_sample_type(sample_type);
            }
            if let Some(loops) = arg("loops").and_then(ElementArg::as_u32) {
                source.set_loop_count(loops);
            }
            if let Some(caching) = arg("pcm_caching").and_then(ElementArg::as_bool) {
                source.enable_pcm_caching(caching);
            }
            if let Some(caching) = arg("file_caching").and_then(ElementArg::as_bool) {
                source.enable_file_caching(caching);
            }
            if let Some(strategy) = arg("io_strategy").and_then(ElementArg::as_io_strategy) {
                source.set_io_strategy(strategy);
            }
            Box::new(source)
        }
        "Gain" => {
            let gain = arg("gain").and_then(ElementArg::as_f32).unwrap_or(1.0);
            Box::new(Gain::with_id(name, id, gain))
        }
        "Effect" => {
            let time = arg("time").and_then(ElementArg::as_u32).unwrap_or(0);
            let duration = arg("duration").and_then(ElementArg::as_u32).unwrap_or(0);
            let kind = arg("effect")
                .and_then(ElementArg::as_effect_kind)
                .unwrap_or(EffectKind::FadeIn);
            Box::new(Effect::with_id(name, id, time, duration, kind))
        }
        "StereoMaker" => {
            let channel = arg("channel")
                .and_then(ElementArg::as_stereo_channel)
                .unwrap_or(StereoChannel::Left);
            Box::new(StereoMaker::with_id(name, id, channel))
        }
        "Mixer" => {
            if create.input_ports.is_empty() {
                Box::new(Mixer::with_id(name, id, 2))
            } else {
                Box::new(Mixer::with_ports(name, id, &create.input_ports))
            }
        }
        "Queue" => Box::new(Queue::with_id(name, id)),
        "Null" => Box::new(Null::with_id(name, id)),
        "Splitter" => {
            if create.output_ports.is_empty() {
                Box::new(Splitter::with_id(name, id, 2))
            } else {
                Box::new(Splitter::with_ports(name, id, &create.output_ports))
            }
        }
        "Playlist" => {
            if create.input_ports.is_empty() {
                Box::new(Playlist::with_id(name, id, 2))
            } else {
                Box::new(Playlist::with_ports(name, id, &create.input_ports))
            }
        }
        unknown => {
            log::warn!("request to create an unknown element type. [type={unknown}]");
            return None;
        }
    };
    Some(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_element_has_a_descriptor_and_factory() {
        for kind in list_audio_elements() {
            let desc = find_element_desc(kind).unwrap();
            let create = ElementCreateArgs {
                id: "id".into(),
                name: "name".into(),
                kind: kind.into(),
                args: desc.args.clone(),
                input_ports: desc.input_ports.clone(),
                output_ports: desc.output_ports.clone(),
            };
            let element = create_element(&create).unwrap();
            assert_eq!(element.kind(), kind);
            assert_eq!(element.id(), "id");
            assert_eq!(element.name(), "name");
            assert_eq!(element.num_input_ports(), desc.input_ports.len());
            assert_eq!(element.num_output_ports(), desc.output_ports.len());
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let create = ElementCreateArgs {
            kind: "Reverb".into(),
            ..Default::default()
        };
        assert!(create_element(&create).is_none());
    }

    #[test]
    fn args_configure_the_element() {
        let mut create = ElementCreateArgs {
            id: "g1".into(),
            name: "gain".into(),
            kind: "Gain".into(),
            ..Default::default()
        };
        create
            .args
            .insert("gain".into(), ElementArg::Float(0.25));
        let element = create_element(&create).unwrap();
        let gain = element.downcast_ref::<Gain>().unwrap();
        assert_eq!(gain.gain(), 0.25);
    }

    #[test]
    fn port_lists_override_defaults() {
        let create = ElementCreateArgs {
            id: "m".into(),
            name: "mixer".into(),
            kind: "Mixer".into(),
            input_ports: ports(&["in0", "in1", "in2", "in3"]),
            output_ports: ports(&["out"]),
            ..Default::default()
        };
        let element = create_element(&create).unwrap();
        assert_eq!(element.num_input_ports(), 4);
    }
}

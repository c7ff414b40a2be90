use std::collections::VecDeque;
use std::fmt;

use downcast_rs::{impl_downcast, Downcast};
use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, BufferAllocator};
use crate::cache::AudioCaches;
use crate::loader::Loader;
use crate::port::Port;

/// The possible fade effects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    /// Ramp the stream gain up from 0.0 to 1.0.
    #[default]
    FadeIn,
    /// Ramp the stream gain down from 1.0 to 0.0.
    FadeOut,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FadeIn => write!(f, "FadeIn"),
            Self::FadeOut => write!(f, "FadeOut"),
        }
    }
}

/// A per-source effect installed on a mixer-source child, applied to each
/// buffer the child produces until the effect reports completion.
pub trait MixerEffect: Send {
    fn apply(&mut self, buffer: &mut Buffer);
    fn is_done(&self) -> bool;
    fn name(&self) -> &'static str;
}

/// Parameters passed to every element's [`Element::prepare`].
#[derive(Default, Clone)]
pub struct PrepareParams {
    /// Allow file sources to publish and reuse decoded PCM.
    pub enable_pcm_caching: bool,
    /// Process-wide decoded-PCM and file-info caches, owned by the
    /// embedding engine.
    pub caches: AudioCaches,
}

/// A typed command addressed to a named element.
///
/// Commands are delivered by mutable reference so receivers can take
/// owning payloads (the added element, the effect object) out of the
/// command instead of cloning them.
pub enum Command {
    /// Gain: set the gain factor at the next tick boundary.
    SetGain { gain: f32 },
    /// Effect: schedule a fade starting at `time` ms on the element's own
    /// clock, running for `duration` ms.
    SetEffect {
        time: u32,
        duration: u32,
        kind: EffectKind,
    },
    /// MixerSource: insert a new child source, keyed by the element's
    /// name. Applied immediately.
    AddSource {
        element: Option<Box<dyn Element>>,
        paused: bool,
    },
    /// MixerSource: remove the named child after `millisecs`.
    DeleteSource { name: String, millisecs: u32 },
    /// MixerSource: remove every child after `millisecs`.
    DeleteAllSources { millisecs: u32 },
    /// MixerSource: pause or resume the named child after `millisecs`.
    PauseSource {
        name: String,
        paused: bool,
        millisecs: u32,
    },
    /// MixerSource: discard pending delayed commands targeting the named
    /// child.
    CancelSourceCommands { name: String },
    /// MixerSource: install or replace the effect on the named child.
    SetSourceEffect {
        source: String,
        effect: Option<Box<dyn MixerEffect>>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetGain { gain } => write!(f, "SetGain({gain})"),
            Self::SetEffect {
                time,
                duration,
                kind,
            } => write!(f, "SetEffect({kind}, time={time}, duration={duration})"),
            Self::AddSource { paused, .. } => write!(f, "AddSource(paused={paused})"),
            Self::DeleteSource { name, millisecs } => {
                write!(f, "DeleteSource({name}, when={millisecs})")
            }
            Self::DeleteAllSources { millisecs } => {
                write!(f, "DeleteAllSources(when={millisecs})")
            }
            Self::PauseSource {
                name,
                paused,
                millisecs,
            } => write!(f, "PauseSource({name}, paused={paused}, when={millisecs})"),
            Self::CancelSourceCommands { name } => write!(f, "CancelSourceCommands({name})"),
            Self::SetSourceEffect { source, .. } => write!(f, "SetSourceEffect({source})"),
        }
    }
}

/// An event emitted by an element during a processing tick.
pub enum ElementEvent {
    /// A mixer-source child was removed (deleted or finished). Carries
    /// the evicted element so the caller learns of its disposal.
    SourceDone {
        mixer: String,
        source: Box<dyn Element>,
    },
    /// A fade effect on a mixer-source child ran to completion.
    EffectDone {
        mixer: String,
        source: String,
        effect: Box<dyn MixerEffect>,
    },
}

impl fmt::Debug for ElementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceDone { mixer, source } => {
                write!(f, "SourceDone(mixer={mixer}, source={})", source.name())
            }
            Self::EffectDone {
                mixer,
                source,
                effect,
            } => write!(
                f,
                "EffectDone(mixer={mixer}, source={source}, effect={})",
                effect.name()
            ),
        }
    }
}

/// Per-tick queue of element events, drained by the owning source.
pub type EventQueue = VecDeque<ElementEvent>;

/// A processing node in an audio graph.
///
/// Each element can take a stream of buffers in through its input ports,
/// modify it and provide an outgoing stream through its output ports.
/// Elements are addressed by a stable `id` and a human readable `name`;
/// commands are routed by name.
pub trait Element: Downcast + Send {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// The element type string, e.g. "Gain". Used by the declarative
    /// class system and by the scheduler's Queue special case.
    fn kind(&self) -> &'static str;

    /// True iff the element can originate buffers without any input.
    fn is_source(&self) -> bool {
        false
    }

    /// True once a source element has no more buffers to produce.
    /// Monotonic: once true it must remain true.
    fn is_source_done(&self) -> bool {
        false
    }

    /// Establish output port formats and fixed internal state. Returns
    /// false on misconfiguration. No I/O beyond what the loader exposes.
    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        true
    }

    /// Consume at most one buffer from each input port and produce at
    /// most one buffer on each output port, covering `milliseconds`
    /// worth of audio.
    fn process(&mut self, allocator: &mut BufferAllocator, events: &mut EventQueue, milliseconds: u32);

    /// Wall-time progression for elements that track time without
    /// producing buffers every tick.
    fn advance(&mut self, _milliseconds: u32) {}

    /// Release external resources.
    fn shutdown(&mut self) {}

    fn receive_command(&mut self, _cmd: &mut Command) {}

    /// Forward a command to a named sub-element. Returns true when the
    /// destination was found somewhere below this element.
    fn dispatch_command(&mut self, _dest: &str, _cmd: &mut Command) -> bool {
        false
    }

    fn num_input_ports(&self) -> usize {
        0
    }

    fn num_output_ports(&self) -> usize {
        0
    }

    fn input_port(&self, index: usize) -> &Port {
        panic!("element '{}' has no input port {index}", self.name());
    }

    fn input_port_mut(&mut self, index: usize) -> &mut Port {
        panic!("element '{}' has no input port {index}", self.name());
    }

    fn output_port(&self, index: usize) -> &Port {
        panic!("element '{}' has no output port {index}", self.name());
    }

    fn output_port_mut(&mut self, index: usize) -> &mut Port {
        panic!("element '{}' has no output port {index}", self.name());
    }

    fn find_input_port_index(&self, name: &str) -> Option<usize> {
        (0..self.num_input_ports()).find(|&i| self.input_port(i).name() == name)
    }

    fn find_output_port_index(&self, name: &str) -> Option<usize> {
        (0..self.num_output_ports()).find(|&i| self.output_port(i).name() == name)
    }
}

impl_downcast!(Element);

use std::sync::Arc;

use larkspur_core::dsp;
use larkspur_core::{
    random_string, Buffer, BufferAllocator, BufferHandle, Command, Element, ElementEvent,
    EventQueue, Format, Loader, MixerEffect, Port, PrepareParams, SampleType,
};

use crate::mixer::mix_buffers;

fn apply_fade(buffer: &mut Buffer, time: f32, duration: f32, fade_in: bool) -> f32 {
    let format = buffer.format();
    if format.sample_rate == 0 || format.frame_size() == 0 || duration <= 0.0 {
        return time;
    }
    let frame_ms = 1000.0 / format.sample_rate as f32;
    let frames = buffer.byte_size() / format.frame_size() as usize;
    let gain = |frame: usize| {
        let progress = ((time + frame as f32 * frame_ms) / duration).clamp(0.0, 1.0);
        if fade_in {
            progress
        } else {
            1.0 - progress
        }
    };
    let channels = format.channel_count;
    match format.sample_type {
        SampleType::Int16 => dsp::apply_frame_gain::<i16>(buffer.as_bytes_mut(), channels, gain),
        SampleType::Int32 => dsp::apply_frame_gain::<i32>(buffer.as_bytes_mut(), channels, gain),
        SampleType::Float32 => dsp::apply_frame_gain::<f32>(buffer.as_bytes_mut(), channels, gain),
        SampleType::NotSet => {}
    }
    time + frames as f32 * frame_ms
}

/// Ramp a source's gain from 0.0 up to 1.0 over a duration.
pub struct FadeIn {
    duration: f32,
    time: f32,
}

impl FadeIn {
    pub fn new(millisecs: u32) -> Self {
        Self {
            duration: millisecs as f32,
            time: 0.0,
        }
    }

    pub fn from_seconds(seconds: f32) -> Self {
        Self {
            duration: seconds * 1000.0,
            time: 0.0,
        }
    }
}

impl MixerEffect for FadeIn {
    fn apply(&mut self, buffer: &mut Buffer) {
        self.time = apply_fade(buffer, self.time, self.duration, true);
    }

    fn is_done(&self) -> bool {
        self.time >= self.duration
    }

    fn name(&self) -> &'static str {
        "FadeIn"
    }
}

/// Ramp a source's gain from 1.0 down to 0.0 over a duration.
pub struct FadeOut {
    duration: f32,
    time: f32,
}

impl FadeOut {
    pub fn new(millisecs: u32) -> Self {
        Self {
            duration: millisecs as f32,
            time: 0.0,
        }
    }

    pub fn from_seconds(seconds: f32) -> Self {
        Self {
            duration: seconds * 1000.0,
            time: 0.0,
        }
    }
}

impl MixerEffect for FadeOut {
    fn apply(&mut self, buffer: &mut Buffer) {
        self.time = apply_fade(buffer, self.time, self.duration, false);
    }

    fn is_done(&self) -> bool {
        self.time >= self.duration
    }

    fn name(&self) -> &'static str {
        "FadeOut"
    }
}

struct ChildSource {
    element: Box<dyn Element>,
    effect: Option<Box<dyn MixerEffect>>,
    paused: bool,
}

enum LateAction {
    Pause { name: String, paused: bool },
    Delete { name: String },
    DeleteAll,
}

/// A command whose deadline has not yet been reached on the mixer clock.
struct LateCommand {
    deadline: u64,
    action: LateAction,
}

/// Wraps multiple source elements into a single source.
///
/// Each child must be a source with one output port carrying the
/// mixer's format. Children are addressed by their element name; their
/// paused state and per-child fade effect are controlled through mixer
/// commands, optionally delayed against the mixer's own accumulated
/// clock. On every tick the non-paused children each process once,
/// their output buffers are faded and mixed into a single output.
pub struct MixerSource {
    name: String,
    id: String,
    format: Format,
    sources: Vec<ChildSource>,
    late_commands: Vec<LateCommand>,
    /// children evicted by command, awaiting SourceDone emission.
    removed: Vec<Box<dyn Element>>,
    output: Port,
    never_done: bool,
    /// accumulated mixer time in milliseconds.
    time: u64,
}

impl MixerSource {
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        Self {
            name: name.into(),
            id: random_string(10),
            format,
            sources: Vec::new(),
            late_commands: Vec::new(),
            removed: Vec::new(),
            output: Port::new("out"),
            never_done: false,
            time: 0,
        }
    }

    /// When set the mixer is never considered done regardless of its
    /// current children. The engine uses this to keep its stream mixers
    /// alive across track changes.
    pub fn set_never_done(&mut self, on_off: bool) {
        self.never_done = on_off;
    }

    /// Add a new source element. The element must be a source with at
    /// least one output port; when its format is already negotiated it
    /// must match the mixer's. A child with a duplicate name is
    /// rejected.
    pub fn add_source(&mut self, element: Box<dyn Element>, paused: bool) -> bool {
        if !element.is_source() || element.num_output_ports() == 0 {
            log::error!(
                "mixer source '{}' rejecting non-source element. [elem={}]",
                self.name,
                element.name()
            );
            return false;
        }
        let port_format = element.output_port(0).format();
        if port_format.is_valid() && port_format != self.format {
            log::error!(
                "mixer source '{}' rejecting incompatible element. [elem={}, format={}]",
                self.name,
                element.name(),
                port_format
            );
            return false;
        }
        if self.sources.iter().any(|c| c.element.name() == element.name()) {
            log::error!(
                "mixer source '{}' already has a source by this name. [elem={}]",
                self.name,
                element.name()
            );
            return false;
        }
        log::debug!(
            "mixer source '{}' adding source. [elem={}, paused={}]",
            self.name,
            element.name(),
            paused
        );
        self.sources.push(ChildSource {
            element,
            effect: None,
            paused,
        });
        true
    }

    /// Pause or resume the named source. Nothing happens when it is
    /// already in the requested state.
    pub fn pause_source(&mut self, name: &str, paused: bool) {
        match self.sources.iter_mut().find(|c| c.element.name() == name) {
            Some(child) => child.paused = paused,
            None => log::warn!(
                "mixer source '{}' has no source to pause. [elem={}]",
                self.name,
                name
            ),
        }
    }

    /// Remove the named source. The eviction is announced with a
    /// SourceDone event on the next processing tick.
    pub fn delete_source(&mut self, name: &str) {
        match self.sources.iter().position(|c| c.element.name() == name) {
            Some(index) => {
                let child = self.sources.remove(index);
                self.removed.push(child.element);
            }
            None => log::warn!(
                "mixer source '{}' has no source to delete. [elem={}]",
                self.name,
                name
            ),
        }
    }

    /// Remove every current source.
    pub fn delete_sources(&mut self) {
        for child in self.sources.drain(..) {
            self.removed.push(child.element);
        }
    }

    /// Discard pending delayed commands targeting the named source.
    pub fn cancel_source_commands(&mut self, name: &str) {
        self.late_commands.retain(|cmd| match &cmd.action {
            LateAction::Pause { name: target, .. } | LateAction::Delete { name: target } => {
                target != name
            }
            LateAction::DeleteAll => true,
        });
    }

    /// Install or replace the effect on the named source. Takes place
    /// immediately, which can create a discontinuity with a previous
    /// effect.
    pub fn set_source_effect(&mut self, name: &str, effect: Box<dyn MixerEffect>) {
        match self.sources.iter_mut().find(|c| c.element.name() == name) {
            Some(child) => {
                log::debug!(
                    "mixer source '{}' setting source effect. [elem={}, effect={}]",
                    self.name,
                    name,
                    effect.name()
                );
                child.effect = Some(effect);
            }
            None => log::warn!(
                "mixer source '{}' has no source for effect. [elem={}]",
                self.name,
                name
            ),
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    fn execute(&mut self, action: LateAction) {
        match action {
            LateAction::Pause { name, paused } => self.pause_source(&name, paused),
            LateAction::Delete { name } => self.delete_source(&name),
            LateAction::DeleteAll => self.delete_sources(),
        }
    }

    fn schedule(&mut self, millisecs: u32, action: LateAction) {
        if millisecs == 0 {
            self.execute(action);
        } else {
            self.late_commands.push(LateCommand {
                deadline: self.time + u64::from(millisecs),
                action,
            });
        }
    }
}

impl Element for MixerSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "MixerSource"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        if self.never_done {
            return false;
        }
        self.sources
            .iter()
            .all(|c| c.element.is_source_done() && !c.element.output_port(0).has_buffers())
    }

    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> bool {
        if !self.format.is_valid() {
            log::error!(
                "mixer source '{}' has an invalid format. [format={}]",
                self.name,
                self.format
            );
            return false;
        }
        for child in &mut self.sources {
            if !child.element.prepare(loader, params) {
                log::error!(
                    "mixer source '{}' child failed to prepare. [elem={}]",
                    self.name,
                    child.element.name()
                );
                return false;
            }
        }
        self.output.set_format(self.format);
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, events: &mut EventQueue, ms: u32) {
        for element in self.removed.drain(..) {
            events.push_back(ElementEvent::SourceDone {
                mixer: self.name.clone(),
                source: element,
            });
        }

        let mut mixed: Option<BufferHandle> = None;
        for child in &mut self.sources {
            if child.paused {
                continue;
            }
            child.element.process(allocator, events, ms);
            let Some(mut buffer) = child.element.output_port_mut(0).pull_buffer() else {
                continue;
            };
            if let Some(effect) = &mut child.effect {
                effect.apply(Arc::make_mut(&mut buffer));
                if effect.is_done() {
                    let effect = child.effect.take().expect("effect present");
                    events.push_back(ElementEvent::EffectDone {
                        mixer: self.name.clone(),
                        source: child.element.name().to_owned(),
                        effect,
                    });
                }
            }
            match &mut mixed {
                None => mixed = Some(buffer),
                Some(acc) => {
                    if buffer.byte_size() > acc.byte_size() {
                        let smaller = std::mem::replace(acc, buffer);
                        mix_buffers(acc, &smaller);
                        allocator.recycle(smaller);
                    } else {
                        mix_buffers(acc, &buffer);
                        allocator.recycle(buffer);
                    }
                }
            }
        }
        if let Some(buffer) = mixed {
            self.output.push_buffer(buffer);
        }

        // children that finished and drained their port go away,
        // announcing their disposal.
        let mut index = 0;
        while index < self.sources.len() {
            let child = &self.sources[index];
            if child.element.is_source_done() && !child.element.output_port(0).has_buffers() {
                let child = self.sources.remove(index);
                log::debug!(
                    "mixer source '{}' source is done. [elem={}]",
                    self.name,
                    child.element.name()
                );
                events.push_back(ElementEvent::SourceDone {
                    mixer: self.name.clone(),
                    source: child.element,
                });
            } else {
                index += 1;
            }
        }
    }

    fn advance(&mut self, milliseconds: u32) {
        self.time += u64::from(milliseconds);
        for child in &mut self.sources {
            child.element.advance(milliseconds);
        }
        let mut index = 0;
        let mut due = Vec::new();
        while index < self.late_commands.len() {
            if self.late_commands[index].deadline <= self.time {
                due.push(self.late_commands.remove(index));
            } else {
                index += 1;
            }
        }
        for command in due {
            self.execute(command.action);
        }
    }

    fn shutdown(&mut self) {
        for child in &mut self.sources {
            child.element.shutdown();
        }
    }

    fn receive_command(&mut self, cmd: &mut Command) {
        match cmd {
            Command::AddSource { element, paused } => {
                if let Some(element) = element.take() {
                    self.add_source(element, *paused);
                }
            }
            Command::DeleteSource { name, millisecs } => {
                let name = name.clone();
                let millisecs = *millisecs;
                self.schedule(millisecs, LateAction::Delete { name });
            }
            Command::DeleteAllSources { millisecs } => {
                let millisecs = *millisecs;
                self.schedule(millisecs, LateAction::DeleteAll);
            }
            Command::PauseSource {
                name,
                paused,
                millisecs,
            } => {
                let action = LateAction::Pause {
                    name: name.clone(),
                    paused: *paused,
                };
                let millisecs = *millisecs;
                self.schedule(millisecs, action);
            }
            Command::CancelSourceCommands { name } => {
                let name = name.clone();
                self.cancel_source_commands(&name);
            }
            Command::SetSourceEffect { source, effect } => {
                if let Some(effect) = effect.take() {
                    let source = source.clone();
                    self.set_source_effect(&source, effect);
                }
            }
            other => log::warn!(
                "mixer source '{}' ignoring command {other:?}",
                self.name
            ),
        }
    }

    fn dispatch_command(&mut self, dest: &str, cmd: &mut Command) -> bool {
        for child in &mut self.sources {
            if child.element.name() == dest {
                child.element.receive_command(cmd);
                return true;
            }
        }
        for child in &mut self.sources {
            if child.element.dispatch_command(dest, cmd) {
                return true;
            }
        }
        false
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&self, index: usize) -> &Port {
        assert!(index == 0, "no such output port");
        &self.output
    }

    fn output_port_mut(&mut self, index: usize) -> &mut Port {
        assert!(index == 0, "no such output port");
        &mut self.output
    }
}

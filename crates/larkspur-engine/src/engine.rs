use std::sync::Arc;

use larkspur_core::{
    AudioCaches, Command, EffectKind, ElementEvent, Format, Loader, MixerEffect, PrepareParams,
    SampleType,
};
use larkspur_elements::{FadeIn, FadeOut, Gain, Mixer, MixerSource};
use larkspur_graph::{
    AudioGraphSource, Device, Graph, GraphClass, Player, PlayerEvent, SourceCommand,
    ThreadProxySource, TrackStatus,
};

/// Shared handle to an immutable graph class.
pub type GraphHandle = Arc<GraphClass>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicEventKind {
    TrackDone,
    EffectDone,
}

/// Something happened to a track playing on one of the engine mixers.
#[derive(Debug, Clone)]
pub struct MusicEvent {
    pub track: String,
    /// "music_mixer" or "effect_mixer".
    pub mixer: String,
    pub kind: MusicEventKind,
}

/// The events the engine reports from [`AudioEngine::update`].
#[derive(Debug, Clone)]
pub enum AudioEvent {
    Music(MusicEvent),
}

/// The audio part of the game engine.
///
/// The engine drives one device stream whose graph mixes two
/// independently controlled sub-streams: a music stream and a one-shot
/// sound effect stream. Both wrap a [`MixerSource`] that accepts an
/// arbitrary number of named tracks; a [`Gain`] element per stream and
/// a final [`Mixer`] complete the shape:
///
/// ```text
/// effect_mixer -> effect_gain -> mixer.in0
/// music_mixer  -> music_gain  -> mixer.in1   mixer -> device
/// ```
///
/// Tracks are instantiated from [`GraphClass`] handles, prepared on the
/// caller's thread and handed to the mixers through routed commands.
pub struct AudioEngine {
    name: String,
    loader: Box<dyn Loader>,
    caches: AudioCaches,
    format: Format,
    buffer_size_ms: u32,
    enable_caching: bool,
    enable_effects: bool,
    player: Option<Player>,
    graph_id: u64,
    /// generates unique element names for effect instances.
    effect_counter: usize,
}

impl AudioEngine {
    pub fn new(name: impl Into<String>, loader: Box<dyn Loader>) -> Self {
        Self {
            name: name.into(),
            loader,
            caches: AudioCaches::new(),
            format: Format::new(SampleType::Float32, 44100, 2),
            buffer_size_ms: 20,
            enable_caching: false,
            enable_effects: true,
            player: None,
            graph_id: 0,
            effect_counter: 0,
        }
    }

    /// The format every track graph must produce.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Override the engine output format. Only before [`AudioEngine::start`].
    pub fn set_format(&mut self, format: Format) {
        assert!(self.player.is_none());
        self.format = format;
    }

    /// Per-stream device buffering in milliseconds.
    pub fn set_buffer_size(&mut self, millisecs: u32) {
        self.buffer_size_ms = millisecs;
    }

    /// Allow file sources with PCM caching enabled to share decoded
    /// data across instances.
    pub fn enable_caching(&mut self, on_off: bool) {
        self.enable_caching = on_off;
    }

    /// Toggle one-shot sound effect playback. When disabled
    /// [`AudioEngine::play_sound_effect`] does nothing.
    pub fn enable_effects(&mut self, on_off: bool) {
        self.enable_effects = on_off;
    }

    pub fn caches(&self) -> &AudioCaches {
        &self.caches
    }

    pub fn clear_caches(&self) {
        self.caches.clear();
    }

    /// Build the standard engine graph, start the worker thread and
    /// begin playback on the device.
    pub fn start(&mut self, device: Box<dyn Device>) -> bool {
        assert!(self.player.is_none(), "audio engine already started");

        let mut graph = Graph::new(self.name.clone());

        let mut music_mixer = MixerSource::new("music_mixer", self.format);
        music_mixer.set_never_done(true);
        let mut effect_mixer = MixerSource::new("effect_mixer", self.format);
        effect_mixer.set_never_done(true);

        graph.add_element(Mixer::new("mixer", 2));
        graph.add_element(effect_mixer);
        graph.add_element(Gain::new("effect_gain", 1.0));
        graph.add_element(music_mixer);
        graph.add_element(Gain::new("music_gain", 1.0));

        assert!(graph.link_elements_by_name("effect_mixer", "out", "effect_gain", "in"));
        assert!(graph.link_elements_by_name("effect_gain", "out", "mixer", "in0"));
        assert!(graph.link_elements_by_name("music_mixer", "out", "music_gain", "in"));
        assert!(graph.link_elements_by_name("music_gain", "out", "mixer", "in1"));
        assert!(graph.link_graph_by_name("mixer", "out"));

        let mut source = AudioGraphSource::new(self.name.clone(), graph);
        if let Err(error) = source.prepare_graph(self.loader.as_ref(), &self.prepare_params()) {
            log::error!("audio engine graph prepare error. [error={error}]");
            return false;
        }

        let proxy = ThreadProxySource::new(Box::new(source));
        let mut player = Player::new(device);
        player.set_buffer_size(self.buffer_size_ms);
        match player.play(Box::new(proxy)) {
            Ok(id) => {
                log::debug!("audio engine graph is ready. [id={id}]");
                self.graph_id = id;
                self.player = Some(player);
                true
            }
            Err(error) => {
                log::error!("audio engine failed to start playback. [error={error}]");
                false
            }
        }
    }

    /// Instantiate and prepare a music track graph and add it to the
    /// music mixer in paused state. Start it with
    /// [`AudioEngine::resume_music`] (or use [`AudioEngine::play_music`]).
    pub fn add_music_graph(&mut self, graph: &GraphHandle) -> bool {
        let Some(instance) = self.instantiate(graph.name().to_owned(), graph) else {
            return false;
        };
        self.send(
            "music_mixer",
            Command::AddSource {
                element: Some(Box::new(instance)),
                paused: true,
            },
        );
        true
    }

    /// Add a music track and schedule it to start after `when`
    /// milliseconds.
    pub fn play_music(&mut self, graph: &GraphHandle, when: u32) -> bool {
        if !self.add_music_graph(graph) {
            return false;
        }
        self.resume_music(graph.name(), when);
        true
    }

    pub fn resume_music(&mut self, track: &str, when: u32) {
        self.send(
            "music_mixer",
            Command::PauseSource {
                name: track.to_owned(),
                paused: false,
                millisecs: when,
            },
        );
    }

    /// Pause the named track without removing it from the mixer.
    pub fn pause_music(&mut self, track: &str, when: u32) {
        self.send(
            "music_mixer",
            Command::PauseSource {
                name: track.to_owned(),
                paused: true,
                millisecs: when,
            },
        );
    }

    /// Remove the named track from the music mixer.
    pub fn kill_music(&mut self, track: &str, when: u32) {
        self.send(
            "music_mixer",
            Command::DeleteSource {
                name: track.to_owned(),
                millisecs: when,
            },
        );
    }

    pub fn kill_all_music(&mut self, when: u32) {
        self.send("music_mixer", Command::DeleteAllSources { millisecs: when });
    }

    /// Discard scheduled commands still pending against the named
    /// track.
    pub fn cancel_music_commands(&mut self, track: &str) {
        self.send(
            "music_mixer",
            Command::CancelSourceCommands {
                name: track.to_owned(),
            },
        );
    }

    /// Fade the named track in or out over `duration` milliseconds,
    /// starting immediately.
    pub fn set_music_effect(&mut self, track: &str, duration: u32, effect: EffectKind) {
        let effect: Box<dyn MixerEffect> = match effect {
            EffectKind::FadeIn => Box::new(FadeIn::new(duration)),
            EffectKind::FadeOut => Box::new(FadeOut::new(duration)),
        };
        self.send(
            "music_mixer",
            Command::SetSourceEffect {
                source: track.to_owned(),
                effect: Some(effect),
            },
        );
    }

    /// Adjust the gain on the music stream. There's no strict range but
    /// you likely want to stay around (0.0, 1.0).
    pub fn set_music_gain(&mut self, gain: f32) {
        self.send("music_gain", Command::SetGain { gain });
    }

    /// Schedule a one-shot sound effect. Each call creates a fresh
    /// uniquely named instance of the effect graph; the generated name
    /// is returned and shows up in the effect stream's events.
    pub fn play_sound_effect(&mut self, graph: &GraphHandle, when: u32) -> Option<String> {
        if !self.enable_effects {
            return None;
        }
        self.effect_counter += 1;
        let name = format!("{}#{}", graph.name(), self.effect_counter);
        let instance = self.instantiate(name.clone(), graph)?;
        self.send(
            "effect_mixer",
            Command::AddSource {
                element: Some(Box::new(instance)),
                paused: true,
            },
        );
        self.send(
            "effect_mixer",
            Command::PauseSource {
                name: name.clone(),
                paused: false,
                millisecs: when,
            },
        );
        Some(name)
    }

    pub fn set_sound_effect_gain(&mut self, gain: f32) {
        self.send("effect_gain", Command::SetGain { gain });
    }

    pub fn kill_sound_effect(&mut self, name: &str, when: u32) {
        self.send(
            "effect_mixer",
            Command::DeleteSource {
                name: name.to_owned(),
                millisecs: when,
            },
        );
    }

    pub fn kill_all_sound_effects(&mut self, when: u32) {
        self.send("effect_mixer", Command::DeleteAllSources { millisecs: when });
    }

    /// Pause/resume the whole device stream, e.g. while sitting in a
    /// debugger.
    pub fn set_debug_pause(&mut self, on_off: bool) {
        let Some(player) = &mut self.player else {
            return;
        };
        if on_off {
            player.pause(self.graph_id);
        } else {
            player.resume(self.graph_id);
        }
    }

    /// Tick the engine: pump the player and translate stream events
    /// into engine events. Call this at some decent granularity so
    /// scheduled commands dispatch without too much latency.
    pub fn update(&mut self, events: &mut Vec<AudioEvent>) {
        let Some(player) = &mut self.player else {
            return;
        };
        player.process_once();
        while let Some(event) = player.poll_event() {
            match event {
                PlayerEvent::SourceComplete { id, status } => {
                    if status == TrackStatus::Failure {
                        log::error!("audio engine stream failed. [id={id}]");
                    } else {
                        log::debug!("audio engine stream complete. [id={id}]");
                    }
                }
                PlayerEvent::SourceEvent { event, .. } => match event {
                    ElementEvent::SourceDone { mixer, source } => {
                        events.push(AudioEvent::Music(MusicEvent {
                            track: source.name().to_owned(),
                            mixer,
                            kind: MusicEventKind::TrackDone,
                        }));
                    }
                    ElementEvent::EffectDone { mixer, source, .. } => {
                        events.push(AudioEvent::Music(MusicEvent {
                            track: source,
                            mixer,
                            kind: MusicEventKind::EffectDone,
                        }));
                    }
                },
            }
        }
    }

    fn prepare_params(&self) -> PrepareParams {
        PrepareParams {
            enable_pcm_caching: self.enable_caching,
            caches: self.caches.clone(),
        }
    }

    /// Instantiate a track graph and verify it fits the engine stream.
    fn instantiate(&self, name: String, graph: &GraphHandle) -> Option<Graph> {
        let mut instance = Graph::from_class(name, graph);
        if let Err(error) = instance.prepare_graph(self.loader.as_ref(), &self.prepare_params()) {
            log::error!(
                "audio engine track graph prepare error. [graph={}, error={error}]",
                graph.name()
            );
            return None;
        }
        if instance.format() != self.format {
            log::error!(
                "audio engine track graph has incompatible output format. [graph={}, format={}]",
                graph.name(),
                instance.format()
            );
            return None;
        }
        Some(instance)
    }

    fn send(&mut self, dest: &str, command: Command) {
        let Some(player) = &mut self.player else {
            log::warn!("audio engine is not started. [dest={dest}]");
            return;
        };
        player.send_command(self.graph_id, SourceCommand::new(dest, command));
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Some(player) = &mut self.player {
            player.cancel(self.graph_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larkspur_core::FileLoader;
    use larkspur_elements::{find_element_desc, ElementArg, ElementCreateArgs};
    use larkspur_graph::NullDevice;

    fn tone_class(name: &str, duration_ms: u32) -> GraphHandle {
        let mut klass = GraphClass::new(name);
        let desc = find_element_desc("SineSource").unwrap();
        let mut sine = ElementCreateArgs {
            id: "tone".into(),
            name: "tone".into(),
            kind: "SineSource".into(),
            args: desc.args,
            input_ports: desc.input_ports,
            output_ports: desc.output_ports,
        };
        sine.args.insert(
            "format".into(),
            ElementArg::Format(Format::new(SampleType::Float32, 44100, 2)),
        );
        sine.args
            .insert("duration".into(), ElementArg::U32(duration_ms));
        klass.add_element(sine);
        klass.set_graph_output_element_id("tone");
        klass.set_graph_output_element_port("out");
        Arc::new(klass)
    }

    fn pump_until(
        engine: &mut AudioEngine,
        events: &mut Vec<AudioEvent>,
        max_millis: u64,
        done: impl Fn(&[AudioEvent]) -> bool,
    ) {
        for _ in 0..max_millis {
            engine.update(events);
            if done(events) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn music_track_plays_to_completion() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        assert!(engine.start(Box::new(NullDevice::new(10))));

        let track = tone_class("theme", 50);
        assert!(engine.play_music(&track, 0));

        let mut events = Vec::new();
        pump_until(&mut engine, &mut events, 2000, |events| !events.is_empty());

        assert!(events.iter().any(|event| matches!(
            event,
            AudioEvent::Music(MusicEvent { track, mixer, kind: MusicEventKind::TrackDone })
                if track == "theme" && mixer == "music_mixer"
        )));
    }

    #[test]
    fn killed_music_reports_track_done() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        assert!(engine.start(Box::new(NullDevice::new(10))));

        // an unbounded tone only ends when killed.
        let track = tone_class("loop", 0);
        assert!(engine.play_music(&track, 0));

        let mut events = Vec::new();
        pump_until(&mut engine, &mut events, 200, |_| false);
        assert!(events.is_empty());

        engine.kill_music("loop", 0);
        pump_until(&mut engine, &mut events, 500, |events| !events.is_empty());
        assert!(events.iter().any(|event| matches!(
            event,
            AudioEvent::Music(MusicEvent { track, kind: MusicEventKind::TrackDone, .. })
                if track == "loop"
        )));
    }

    #[test]
    fn sound_effects_get_unique_names() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        assert!(engine.start(Box::new(NullDevice::new(10))));

        let effect = tone_class("laser", 20);
        let first = engine.play_sound_effect(&effect, 0).unwrap();
        let second = engine.play_sound_effect(&effect, 0).unwrap();
        assert_ne!(first, second);

        let mut events = Vec::new();
        pump_until(&mut engine, &mut events, 2000, |events| events.len() >= 2);

        for name in [&first, &second] {
            assert!(events.iter().any(|event| matches!(
                event,
                AudioEvent::Music(MusicEvent { track, mixer, kind: MusicEventKind::TrackDone })
                    if track == name && mixer == "effect_mixer"
            )));
        }
    }

    #[test]
    fn fade_effect_completion_is_reported() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        assert!(engine.start(Box::new(NullDevice::new(10))));

        let track = tone_class("fade", 0);
        assert!(engine.play_music(&track, 0));
        engine.set_music_effect("fade", 30, EffectKind::FadeIn);

        let mut events = Vec::new();
        pump_until(&mut engine, &mut events, 2000, |events| !events.is_empty());
        assert!(events.iter().any(|event| matches!(
            event,
            AudioEvent::Music(MusicEvent { track, kind: MusicEventKind::EffectDone, .. })
                if track == "fade"
        )));
    }

    #[test]
    fn disabled_effects_play_nothing() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        engine.enable_effects(false);
        assert!(engine.start(Box::new(NullDevice::new(10))));
        assert!(engine.play_sound_effect(&tone_class("laser", 10), 0).is_none());
    }

    #[test]
    fn incompatible_track_format_is_rejected() {
        let mut engine = AudioEngine::new("test", Box::new(FileLoader::new()));
        assert!(engine.start(Box::new(NullDevice::new(10))));

        let mut klass = GraphClass::new("wrong");
        let desc = find_element_desc("ZeroSource").unwrap();
        let mut zero = ElementCreateArgs {
            id: "z".into(),
            name: "z".into(),
            kind: "ZeroSource".into(),
            args: desc.args,
            input_ports: desc.input_ports,
            output_ports: desc.output_ports,
        };
        zero.args.insert(
            "format".into(),
            ElementArg::Format(Format::new(SampleType::Int16, 8000, 1)),
        );
        klass.add_element(zero);
        klass.set_graph_output_element_id("z");
        klass.set_graph_output_element_port("out");

        assert!(!engine.play_music(&Arc::new(klass), 0));
    }
}

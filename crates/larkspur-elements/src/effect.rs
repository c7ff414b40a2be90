use std::sync::Arc;

use larkspur_core::dsp;
use larkspur_core::{
    random_string, BufferAllocator, Command, EffectKind, Element, EventQueue, Loader, Port,
    PrepareParams, SampleType,
};

/// Manipulate the stream gain over time to fade the stream in or out.
///
/// The fade starts at a scheduled time on the element's own clock and
/// runs for a fixed duration. Audio before the start time passes
/// through untouched; after the fade ends the terminal gain holds
/// (unity for a fade-in, silence for a fade-out).
pub struct Effect {
    name: String,
    id: String,
    input: Port,
    output: Port,
    kind: EffectKind,
    /// duration of the fade in milliseconds.
    duration: u32,
    start_time: u32,
    /// how far along the element clock is, in milliseconds.
    sample_time: f64,
    sample_rate: u32,
}

impl Effect {
    pub fn new(name: impl Into<String>, time: u32, duration: u32, kind: EffectKind) -> Self {
        Self::with_id(name, random_string(10), time, duration, kind)
    }

    pub fn with_id(
        name: impl Into<String>,
        id: impl Into<String>,
        time: u32,
        duration: u32,
        kind: EffectKind,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            kind,
            duration,
            start_time: time,
            sample_time: 0.0,
            sample_rate: 0,
        }
    }

    pub fn set_effect(&mut self, kind: EffectKind, time: u32, duration: u32) {
        self.kind = kind;
        self.start_time = time;
        self.duration = duration;
    }

    fn gain_at(&self, time_ms: f64) -> f32 {
        let start = f64::from(self.start_time);
        let end = start + f64::from(self.duration);
        if time_ms < start || self.duration == 0 {
            return 1.0;
        }
        if time_ms >= end {
            return match self.kind {
                EffectKind::FadeIn => 1.0,
                EffectKind::FadeOut => 0.0,
            };
        }
        let progress = ((time_ms - start) / f64::from(self.duration)) as f32;
        match self.kind {
            EffectKind::FadeIn => progress,
            EffectKind::FadeOut => 1.0 - progress,
        }
    }
}

impl Element for Effect {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Effect"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        let format = self.input.format();
        self.sample_rate = format.sample_rate;
        self.output.set_format(format);
        true
    }

    fn process(&mut self, _allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        let Some(mut buffer) = self.input.pull_buffer() else {
            return;
        };
        let format = buffer.format();
        let rate = if format.sample_rate > 0 {
            format.sample_rate
        } else {
            self.sample_rate
        };
        if rate > 0 && format.frame_size() > 0 {
            let frame_ms = 1000.0 / f64::from(rate);
            let frames = buffer.byte_size() / format.frame_size() as usize;
            let base = self.sample_time;
            let data = Arc::make_mut(&mut buffer);
            let gain = |frame: usize| self.gain_at(base + frame as f64 * frame_ms);
            match format.sample_type {
                SampleType::Int16 => {
                    dsp::apply_frame_gain::<i16>(data.as_bytes_mut(), format.channel_count, gain)
                }
                SampleType::Int32 => {
                    dsp::apply_frame_gain::<i32>(data.as_bytes_mut(), format.channel_count, gain)
                }
                SampleType::Float32 => {
                    dsp::apply_frame_gain::<f32>(data.as_bytes_mut(), format.channel_count, gain)
                }
                SampleType::NotSet => {}
            }
            self.sample_time += frames as f64 * frame_ms;
        }
        self.output.push_buffer(buffer);
    }

    fn receive_command(&mut self, cmd: &mut Command) {
        match cmd {
            Command::SetEffect {
                time,
                duration,
                kind,
            } => self.set_effect(*kind, *time, *duration),
            other => log::warn!("effect element '{}' ignoring command {other:?}", self.name),
        }
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn input_port(&self, index: usize) -> &Port {
        assert!(index == 0, "no such input port");
        &self.input
    }

    fn input_port_mut(&mut self, index: usize) -> &mut Port {
        assert!(index == 0, "no such input port");
        &mut self.input
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

#[cfg(test)]
mod tests {
    use super::*;
    use larkspur_core::dsp::Sample;
    use larkspur_core::{BufferHandle, Format};

    const FORMAT: Format = Format::new(SampleType::Float32, 1000, 1);

    fn ones(allocator: &mut BufferAllocator, frames: usize) -> BufferHandle {
        let mut handle = allocator.allocate(frames * 4);
        let buffer = Arc::make_mut(&mut handle);
        buffer.set_format(FORMAT);
        dsp::write_frames::<f32>(buffer.as_bytes_mut(), 1, |_| 1.0);
        handle
    }

    fn samples(buffer: &BufferHandle) -> Vec<f32> {
        buffer.as_bytes().chunks_exact(4).map(f32::read).collect()
    }

    // 1000 Hz mono makes one frame equal one millisecond.
    #[test]
    fn fade_in_ramps_up() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut effect = Effect::new("fade", 0, 4, EffectKind::FadeIn);

        effect.input_port_mut(0).push_buffer(ones(&mut allocator, 8));
        effect.process(&mut allocator, &mut events, 8);
        let out = effect.output_port_mut(0).pull_buffer().unwrap();
        let got = samples(&out);
        assert_eq!(got[0], 0.0);
        assert_eq!(got[1], 0.25);
        assert_eq!(got[3], 0.75);
        // fade finished, terminal gain is unity.
        assert_eq!(got[4], 1.0);
        assert_eq!(got[7], 1.0);
    }

    #[test]
    fn passes_through_before_start() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut effect = Effect::new("fade", 4, 4, EffectKind::FadeOut);

        effect.input_port_mut(0).push_buffer(ones(&mut allocator, 4));
        effect.process(&mut allocator, &mut events, 4);
        let out = effect.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(samples(&out), vec![1.0; 4]);

        // the element clock advanced past the start; the next buffer fades.
        effect.input_port_mut(0).push_buffer(ones(&mut allocator, 4));
        effect.process(&mut allocator, &mut events, 4);
        let out = effect.output_port_mut(0).pull_buffer().unwrap();
        let got = samples(&out);
        assert_eq!(got[0], 1.0);
        assert_eq!(got[2], 0.5);

        // after the fade-out ends everything is silence.
        effect.input_port_mut(0).push_buffer(ones(&mut allocator, 4));
        effect.process(&mut allocator, &mut events, 4);
        let out = effect.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(samples(&out), vec![0.0; 4]);
    }
}

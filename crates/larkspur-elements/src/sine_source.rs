use std::sync::Arc;

use larkspur_core::dsp;
use larkspur_core::{
    random_string, BufferAllocator, Element, EventQueue, Format, Loader, Port, PrepareParams,
    SampleType,
};

/// A source producing a sine tone at a configured frequency.
///
/// All channels carry the same signal. With a non-zero duration the
/// source finishes once that many milliseconds have been produced;
/// a zero duration plays forever.
pub struct SineSource {
    name: String,
    id: String,
    format: Format,
    frequency: u32,
    /// duration in milliseconds, 0 = unbounded.
    duration: u32,
    frames_produced: u64,
    output: Port,
}

impl SineSource {
    pub fn new(name: impl Into<String>, format: Format, frequency: u32, duration: u32) -> Self {
        Self::with_id(name, random_string(10), format, frequency, duration)
    }

    pub fn with_id(
        name: impl Into<String>,
        id: impl Into<String>,
        format: Format,
        frequency: u32,
        duration: u32,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            format,
            frequency,
            duration,
            frames_produced: 0,
            output: Port::new("out"),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        (self.duration > 0)
            .then(|| u64::from(self.format.sample_rate / 1000) * u64::from(self.duration))
    }
}

impl Element for SineSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "SineSource"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        match self.total_frames() {
            Some(total) => self.frames_produced >= total,
            None => false,
        }
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        if !self.format.is_valid() || self.frequency == 0 {
            log::error!(
                "sine source '{}' misconfigured. [format={}, frequency={}]",
                self.name,
                self.format,
                self.frequency
            );
            return false;
        }
        self.output.set_format(self.format);
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, ms: u32) {
        let mut frames = u64::from(self.format.sample_rate / 1000) * u64::from(ms);
        if let Some(total) = self.total_frames() {
            frames = frames.min(total.saturating_sub(self.frames_produced));
        }
        if frames == 0 {
            return;
        }
        let bytes = frames as usize * self.format.frame_size() as usize;
        let mut handle = allocator.allocate(bytes);
        {
            let buffer = Arc::make_mut(&mut handle);
            buffer.set_format(self.format);
            let start = self.frames_produced;
            let step = f64::from(self.frequency) / f64::from(self.format.sample_rate);
            let sample = |frame: usize| {
                let phase = (start + frame as u64) as f64 * step;
                (phase * std::f64::consts::TAU).sin() as f32
            };
            let channels = self.format.channel_count;
            match self.format.sample_type {
                SampleType::Int16 => dsp::write_frames::<i16>(buffer.as_bytes_mut(), channels, sample),
                SampleType::Int32 => dsp::write_frames::<i32>(buffer.as_bytes_mut(), channels, sample),
                SampleType::Float32 => {
                    dsp::write_frames::<f32>(buffer.as_bytes_mut(), channels, sample)
                }
                SampleType::NotSet => {}
            }
        }
        self.frames_produced += frames;
        self.output.push_buffer(handle);
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

#[cfg(test)]
mod tests {
    use super::*;
    use larkspur_core::dsp::Sample;
    use larkspur_core::FileLoader;

    #[test]
    fn finishes_after_duration() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let format = Format::new(SampleType::Float32, 8000, 1);
        let mut source = SineSource::new("sine", format, 440, 2);
        assert!(source.prepare(&FileLoader::new(), &PrepareParams::default()));

        source.process(&mut allocator, &mut events, 1);
        let first = source.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(first.byte_size(), 8 * 4);
        assert!(!source.is_source_done());

        // asking for more than remains yields only the remainder.
        source.process(&mut allocator, &mut events, 5);
        let second = source.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(second.byte_size(), 8 * 4);
        assert!(source.is_source_done());

        source.process(&mut allocator, &mut events, 1);
        assert!(!source.output_port(0).has_buffers());
    }

    #[test]
    fn waveform_starts_at_zero_and_oscillates() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        // 1000 Hz tone at 8 kHz: a full period every 8 frames.
        let format = Format::new(SampleType::Float32, 8000, 1);
        let mut source = SineSource::new("sine", format, 1000, 0);
        assert!(source.prepare(&FileLoader::new(), &PrepareParams::default()));

        source.process(&mut allocator, &mut events, 1);
        let out = source.output_port_mut(0).pull_buffer().unwrap();
        let samples: Vec<f32> = out.as_bytes().chunks_exact(4).map(f32::read).collect();
        assert!(samples[0].abs() < 1e-6);
        assert!((samples[2] - 1.0).abs() < 1e-6);
        assert!((samples[6] + 1.0).abs() < 1e-6);
    }
}

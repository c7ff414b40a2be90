use std::sync::Arc;

use larkspur_core::dsp;
use larkspur_core::{
    random_string, BufferAllocator, Command, Element, EventQueue, Loader, Port, PrepareParams,
    SampleType,
};

/// Adjust the stream's gain (volume) setting.
///
/// Every sample is multiplied by the gain factor, clamped to the
/// representable range of the sample type. [`Command::SetGain`] updates
/// the factor at a tick boundary.
pub struct Gain {
    name: String,
    id: String,
    input: Port,
    output: Port,
    gain: f32,
}

impl Gain {
    pub fn new(name: impl Into<String>, gain: f32) -> Self {
        Self::with_id(name, random_string(10), gain)
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>, gain: f32) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            gain,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Element for Gain {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Gain"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        self.output.set_format(self.input.format());
        true
    }

    fn process(&mut self, _allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        let Some(mut buffer) = self.input.pull_buffer() else {
            return;
        };
        let format = buffer.format();
        let data = Arc::make_mut(&mut buffer);
        match format.sample_type {
            SampleType::Int16 => dsp::apply_gain::<i16>(data.as_bytes_mut(), self.gain),
            SampleType::Int32 => dsp::apply_gain::<i32>(data.as_bytes_mut(), self.gain),
            SampleType::Float32 => dsp::apply_gain::<f32>(data.as_bytes_mut(), self.gain),
            SampleType::NotSet => {}
        }
        self.output.push_buffer(buffer);
    }

    fn receive_command(&mut self, cmd: &mut Command) {
        match cmd {
            Command::SetGain { gain } => self.gain = *gain,
            other => log::warn!("gain element '{}' ignoring command {other:?}", self.name),
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
    use larkspur_core::Format;

    fn make_buffer(allocator: &mut BufferAllocator, samples: &[i16]) -> larkspur_core::BufferHandle {
        let mut handle = allocator.allocate(samples.len() * 2);
        let buffer = Arc::make_mut(&mut handle);
        buffer.set_format(Format::new(SampleType::Int16, 8000, 1));
        for (chunk, &sample) in buffer.as_bytes_mut().chunks_exact_mut(2).zip(samples) {
            sample.write(chunk);
        }
        handle
    }

    #[test]
    fn applies_gain_to_each_sample() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut gain = Gain::new("gain", 0.5);

        let buffer = make_buffer(&mut allocator, &[100, -100, 2000]);
        assert!(gain.input_port_mut(0).push_buffer(buffer));
        gain.process(&mut allocator, &mut events, 1);

        let out = gain.output_port_mut(0).pull_buffer().unwrap();
        let samples: Vec<i16> = out.as_bytes().chunks_exact(2).map(i16::read).collect();
        assert_eq!(samples, vec![50, -50, 1000]);
    }

    #[test]
    fn set_gain_command() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut gain = Gain::new("gain", 1.0);

        let mut cmd = Command::SetGain { gain: 2.0 };
        gain.receive_command(&mut cmd);
        assert_eq!(gain.gain(), 2.0);

        let buffer = make_buffer(&mut allocator, &[i16::MAX]);
        gain.input_port_mut(0).push_buffer(buffer);
        gain.process(&mut allocator, &mut events, 1);

        let out = gain.output_port_mut(0).pull_buffer().unwrap();
        // doubling the maximum clamps instead of wrapping.
        assert_eq!(i16::read(&out.as_bytes()[..2]), i16::MAX);
    }

    #[test]
    fn no_output_without_input() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut gain = Gain::new("gain", 1.0);
        gain.process(&mut allocator, &mut events, 1);
        assert!(!gain.output_port(0).has_buffers());
    }
}

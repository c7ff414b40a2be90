use std::sync::Arc;

use serde::{Deserialize, Serialize};

use larkspur_core::dsp::Sample;
use larkspur_core::{
    random_string, BufferAllocator, BufferHandle, Element, EventQueue, Format, Loader, Port,
    PrepareParams, SampleType,
};

/// Which stereo channel receives the mono signal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StereoChannel {
    #[default]
    Left = 0,
    Right = 1,
    Both = 2,
}

/// Turn a possible mono audio stream into a stereo stream.
///
/// A stereo input passes through unchanged. A mono input is widened to
/// two channels: `Both` duplicates the sample into both channels,
/// `Left`/`Right` place it on the named channel and write silence to
/// the other.
pub struct StereoMaker {
    name: String,
    id: String,
    channel: StereoChannel,
    input: Port,
    output: Port,
}

impl StereoMaker {
    pub fn new(name: impl Into<String>, channel: StereoChannel) -> Self {
        Self::with_id(name, random_string(10), channel)
    }

    pub fn with_id(
        name: impl Into<String>,
        id: impl Into<String>,
        channel: StereoChannel,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            channel,
            input: Port::new("in"),
            output: Port::new("out"),
        }
    }

    fn widen<S: Sample>(
        &self,
        allocator: &mut BufferAllocator,
        mono: &BufferHandle,
        format: Format,
    ) -> BufferHandle {
        let mut out = allocator.allocate(mono.byte_size() * 2);
        {
            let buffer = Arc::make_mut(&mut out);
            buffer.set_format(Format::new(format.sample_type, format.sample_rate, 2));
            let src = mono.as_bytes();
            let dst = buffer.as_bytes_mut();
            for (frame, sample) in src.chunks_exact(S::BYTES).enumerate() {
                let value = S::read(sample);
                let (left, right) = match self.channel {
                    StereoChannel::Both => (value, value),
                    StereoChannel::Left => (value, S::default()),
                    StereoChannel::Right => (S::default(), value),
                };
                let offset = frame * S::BYTES * 2;
                left.write(&mut dst[offset..]);
                right.write(&mut dst[offset + S::BYTES..]);
            }
        }
        out
    }
}

impl Element for StereoMaker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "StereoMaker"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        let format = self.input.format();
        self.output.set_format(Format::new(
            format.sample_type,
            format.sample_rate,
            2,
        ));
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        let Some(buffer) = self.input.pull_buffer() else {
            return;
        };
        let format = buffer.format();
        if format.channel_count != 1 {
            self.output.push_buffer(buffer);
            return;
        }
        let widened = match format.sample_type {
            SampleType::Int16 => self.widen::<i16>(allocator, &buffer, format),
            SampleType::Int32 => self.widen::<i32>(allocator, &buffer, format),
            SampleType::Float32 => self.widen::<f32>(allocator, &buffer, format),
            SampleType::NotSet => buffer.clone(),
        };
        allocator.recycle(buffer);
        self.output.push_buffer(widened);
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

    fn mono_buffer(allocator: &mut BufferAllocator, samples: &[i16]) -> BufferHandle {
        let mut handle = allocator.allocate(samples.len() * 2);
        let buffer = Arc::make_mut(&mut handle);
        buffer.set_format(Format::new(SampleType::Int16, 8000, 1));
        for (chunk, &sample) in buffer.as_bytes_mut().chunks_exact_mut(2).zip(samples) {
            sample.write(chunk);
        }
        handle
    }

    fn run(channel: StereoChannel, samples: &[i16]) -> Vec<i16> {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut maker = StereoMaker::new("stereo", channel);
        maker
            .input_port_mut(0)
            .push_buffer(mono_buffer(&mut allocator, samples));
        maker.process(&mut allocator, &mut events, 1);
        let out = maker.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(out.format().channel_count, 2);
        out.as_bytes().chunks_exact(2).map(i16::read).collect()
    }

    #[test]
    fn duplicates_mono_into_both() {
        assert_eq!(run(StereoChannel::Both, &[1, 2]), vec![1, 1, 2, 2]);
    }

    #[test]
    fn selects_left_or_right() {
        assert_eq!(run(StereoChannel::Left, &[7]), vec![7, 0]);
        assert_eq!(run(StereoChannel::Right, &[7]), vec![0, 7]);
    }

    #[test]
    fn stereo_passes_through() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut maker = StereoMaker::new("stereo", StereoChannel::Both);

        let mut handle = allocator.allocate(8);
        Arc::make_mut(&mut handle).set_format(Format::new(SampleType::Int16, 8000, 2));
        maker.input_port_mut(0).push_buffer(handle);
        maker.process(&mut allocator, &mut events, 1);
        let out = maker.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(out.byte_size(), 8);
    }
}

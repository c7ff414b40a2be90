use std::sync::Arc;

use larkspur_core::dsp;
use larkspur_core::{
    random_string, BufferAllocator, BufferHandle, Element, EventQueue, Loader, Port, PortDesc,
    PrepareParams, SampleType,
};

/// Mix multiple audio streams into a single stream.
///
/// The streams must all have the same format, i.e. the same underlying
/// sample type, rate and channel count; this is enforced during
/// preparation. On every tick one buffer is pulled from each input that
/// has one; the buffers are summed frame-aligned with saturating
/// arithmetic. Inputs with no pending buffer contribute silence.
pub struct Mixer {
    name: String,
    id: String,
    inputs: Vec<Port>,
    output: Port,
}

impl Mixer {
    pub fn new(name: impl Into<String>, num_srcs: usize) -> Self {
        Self::with_id(name, random_string(10), num_srcs)
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>, num_srcs: usize) -> Self {
        let inputs = (0..num_srcs).map(|i| Port::new(format!("in{i}"))).collect();
        Self {
            name: name.into(),
            id: id.into(),
            inputs,
            output: Port::new("out"),
        }
    }

    pub fn with_ports(
        name: impl Into<String>,
        id: impl Into<String>,
        srcs: &[PortDesc],
    ) -> Self {
        let inputs = srcs.iter().map(|desc| Port::new(desc.name.clone())).collect();
        Self {
            name: name.into(),
            id: id.into(),
            inputs,
            output: Port::new("out"),
        }
    }
}

/// Sum `src` into `dst`, dispatching on the buffer's sample type.
pub(crate) fn mix_buffers(dst: &mut BufferHandle, src: &BufferHandle) {
    let sample_type = dst.format().sample_type;
    let dst = Arc::make_mut(dst);
    match sample_type {
        SampleType::Int16 => dsp::mix_into::<i16>(dst.as_bytes_mut(), src.as_bytes()),
        SampleType::Int32 => dsp::mix_into::<i32>(dst.as_bytes_mut(), src.as_bytes()),
        SampleType::Float32 => dsp::mix_into::<f32>(dst.as_bytes_mut(), src.as_bytes()),
        SampleType::NotSet => {}
    }
}

impl Element for Mixer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Mixer"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        let mut format = None;
        for input in &self.inputs {
            if !input.format().is_valid() {
                continue;
            }
            match format {
                None => format = Some(input.format()),
                Some(expected) if expected != input.format() => {
                    log::error!(
                        "mixer '{}' input formats are incompatible. [{} vs {}]",
                        self.name,
                        expected,
                        input.format()
                    );
                    return false;
                }
                Some(_) => {}
            }
        }
        self.output.set_format(format.unwrap_or_default());
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        // use the largest pulled buffer as the accumulation base so no
        // trailing frames of a longer input are lost.
        let mut base: Option<BufferHandle> = None;
        for input in &mut self.inputs {
            let Some(buffer) = input.pull_buffer() else {
                continue;
            };
            match &mut base {
                None => base = Some(buffer),
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
        if let Some(buffer) = base {
            self.output.push_buffer(buffer);
        }
    }

    fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn input_port(&self, index: usize) -> &Port {
        &self.inputs[index]
    }

    fn input_port_mut(&mut self, index: usize) -> &mut Port {
        &mut self.inputs[index]
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
    use larkspur_core::{FileLoader, Format};

    const FORMAT: Format = Format::new(SampleType::Int16, 8000, 1);

    fn buffer_of(allocator: &mut BufferAllocator, samples: &[i16]) -> BufferHandle {
        let mut handle = allocator.allocate(samples.len() * 2);
        let buffer = Arc::make_mut(&mut handle);
        buffer.set_format(FORMAT);
        for (chunk, &sample) in buffer.as_bytes_mut().chunks_exact_mut(2).zip(samples) {
            sample.write(chunk);
        }
        handle
    }

    #[test]
    fn sums_all_available_inputs() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = Mixer::new("mixer", 3);

        mixer
            .input_port_mut(0)
            .push_buffer(buffer_of(&mut allocator, &[10, 20]));
        mixer
            .input_port_mut(1)
            .push_buffer(buffer_of(&mut allocator, &[1, 2]));
        // in2 is missing: treated as silence.
        mixer.process(&mut allocator, &mut events, 1);

        let out = mixer.output_port_mut(0).pull_buffer().unwrap();
        let samples: Vec<i16> = out.as_bytes().chunks_exact(2).map(i16::read).collect();
        assert_eq!(samples, vec![11, 22]);
    }

    #[test]
    fn saturates_on_overflow() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = Mixer::new("mixer", 2);

        mixer
            .input_port_mut(0)
            .push_buffer(buffer_of(&mut allocator, &[i16::MAX]));
        mixer
            .input_port_mut(1)
            .push_buffer(buffer_of(&mut allocator, &[1000]));
        mixer.process(&mut allocator, &mut events, 1);

        let out = mixer.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(i16::read(&out.as_bytes()[..2]), i16::MAX);
    }

    #[test]
    fn longer_input_wins_the_base() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = Mixer::new("mixer", 2);

        mixer
            .input_port_mut(0)
            .push_buffer(buffer_of(&mut allocator, &[1]));
        mixer
            .input_port_mut(1)
            .push_buffer(buffer_of(&mut allocator, &[2, 3]));
        mixer.process(&mut allocator, &mut events, 1);

        let out = mixer.output_port_mut(0).pull_buffer().unwrap();
        let samples: Vec<i16> = out.as_bytes().chunks_exact(2).map(i16::read).collect();
        assert_eq!(samples, vec![3, 3]);
    }

    #[test]
    fn prepare_rejects_mismatched_inputs() {
        let mut mixer = Mixer::new("mixer", 2);
        mixer.input_port_mut(0).set_format(FORMAT);
        mixer
            .input_port_mut(1)
            .set_format(Format::new(SampleType::Float32, 8000, 1));
        assert!(!mixer.prepare(&FileLoader::new(), &PrepareParams::default()));

        mixer.input_port_mut(1).set_format(FORMAT);
        assert!(mixer.prepare(&FileLoader::new(), &PrepareParams::default()));
        assert_eq!(mixer.output_port(0).format(), FORMAT);
    }
}

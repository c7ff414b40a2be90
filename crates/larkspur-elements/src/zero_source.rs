use std::sync::Arc;

use larkspur_core::{
    random_string, BufferAllocator, Element, EventQueue, Format, Loader, Port, PrepareParams,
};

/// A source producing endless silence at a configured format.
///
/// Useful as a placeholder signal and for testing graph plumbing
/// without touching any decoder.
pub struct ZeroSource {
    name: String,
    id: String,
    format: Format,
    output: Port,
}

impl ZeroSource {
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        Self::with_id(name, random_string(10), format)
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>, format: Format) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            format,
            output: Port::new("out"),
        }
    }
}

impl Element for ZeroSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "ZeroSource"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        if !self.format.is_valid() {
            log::error!(
                "zero source '{}' has an invalid format. [format={}]",
                self.name,
                self.format
            );
            return false;
        }
        self.output.set_format(self.format);
        true
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, ms: u32) {
        let frames = (self.format.sample_rate / 1000) * ms;
        let bytes = frames as usize * self.format.frame_size() as usize;
        if bytes == 0 {
            return;
        }
        let mut handle = allocator.allocate(bytes);
        {
            let buffer = Arc::make_mut(&mut handle);
            buffer.set_format(self.format);
            // pooled buffers keep their previous contents.
            buffer.as_bytes_mut().fill(0);
        }
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
    use larkspur_core::{FileLoader, SampleType};

    #[test]
    fn emits_one_millisecond_of_silence() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let format = Format::new(SampleType::Int16, 16000, 1);
        let mut source = ZeroSource::new("zero", format);
        assert!(source.prepare(&FileLoader::new(), &PrepareParams::default()));

        source.process(&mut allocator, &mut events, 1);
        let out = source.output_port_mut(0).pull_buffer().unwrap();
        // 16 frames x 2 bytes x 1 channel
        assert_eq!(out.byte_size(), 32);
        assert!(out.as_bytes().iter().all(|&b| b == 0));
        assert!(!source.is_source_done());
    }

    #[test]
    fn invalid_format_fails_prepare() {
        let mut source = ZeroSource::new("zero", Format::default());
        assert!(!source.prepare(&FileLoader::new(), &PrepareParams::default()));
    }
}

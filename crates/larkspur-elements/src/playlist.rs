use larkspur_core::{
    random_string, BufferAllocator, Element, EventQueue, Loader, Port, PortDesc, PrepareParams,
};

/// Play the input streams one after another.
///
/// Buffers are forwarded from the current input only. When a forwarded
/// buffer's info tags report the producing source done, the playlist
/// advances to the next input. Inputs beyond the current one simply
/// backpressure their upstreams until their turn comes.
pub struct Playlist {
    name: String,
    id: String,
    inputs: Vec<Port>,
    output: Port,
    current: usize,
}

impl Playlist {
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
            current: 0,
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
            current: 0,
        }
    }

    /// Index of the input currently playing.
    pub fn current_input(&self) -> usize {
        self.current
    }
}

impl Element for Playlist {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Playlist"
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
                        "playlist '{}' input formats are incompatible. [{} vs {}]",
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

    fn process(&mut self, _allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        if self.current >= self.inputs.len() || self.output.is_full() {
            return;
        }
        let Some(buffer) = self.inputs[self.current].pull_buffer() else {
            return;
        };
        let producer_done = buffer
            .info_tags()
            .iter()
            .any(|tag| tag.source && tag.source_done);
        self.output.push_buffer(buffer);
        if producer_done {
            self.current += 1;
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
    use larkspur_core::{BufferHandle, InfoTag};
    use std::sync::Arc;

    fn tagged(allocator: &mut BufferAllocator, marker: u8, done: bool) -> BufferHandle {
        let mut handle = allocator.allocate(1);
        let buffer = Arc::make_mut(&mut handle);
        buffer.as_bytes_mut()[0] = marker;
        buffer.add_info_tag(InfoTag {
            element_name: "src".into(),
            element_id: "1".into(),
            source: true,
            source_done: done,
        });
        handle
    }

    #[test]
    fn advances_when_the_source_reports_done() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut playlist = Playlist::new("playlist", 2);

        playlist
            .input_port_mut(0)
            .push_buffer(tagged(&mut allocator, 1, false));
        playlist.process(&mut allocator, &mut events, 1);
        assert_eq!(playlist.current_input(), 0);
        assert_eq!(
            playlist.output_port_mut(0).pull_buffer().unwrap().as_bytes()[0],
            1
        );

        playlist
            .input_port_mut(0)
            .push_buffer(tagged(&mut allocator, 2, true));
        // input 1 already has data waiting; it is not consumed yet.
        playlist
            .input_port_mut(1)
            .push_buffer(tagged(&mut allocator, 3, false));
        playlist.process(&mut allocator, &mut events, 1);
        assert_eq!(playlist.current_input(), 1);
        assert_eq!(
            playlist.output_port_mut(0).pull_buffer().unwrap().as_bytes()[0],
            2
        );

        playlist.process(&mut allocator, &mut events, 1);
        assert_eq!(
            playlist.output_port_mut(0).pull_buffer().unwrap().as_bytes()[0],
            3
        );
    }
}

use larkspur_core::{
    random_string, BufferAllocator, Element, EventQueue, Loader, Port, PortDesc, PrepareParams,
};

/// Duplicate a single input stream onto every output port.
///
/// The buffer handle is shared, not copied; downstream consumers must
/// not rely on exclusive ownership of a split buffer (in-place
/// modification copies on write).
pub struct Splitter {
    name: String,
    id: String,
    input: Port,
    outputs: Vec<Port>,
}

impl Splitter {
    pub fn new(name: impl Into<String>, num_outs: usize) -> Self {
        Self::with_id(name, random_string(10), num_outs)
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>, num_outs: usize) -> Self {
        let outputs = (0..num_outs).map(|i| Port::new(format!("out{i}"))).collect();
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            outputs,
        }
    }

    pub fn with_ports(
        name: impl Into<String>,
        id: impl Into<String>,
        outs: &[PortDesc],
    ) -> Self {
        let outputs = outs.iter().map(|desc| Port::new(desc.name.clone())).collect();
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            outputs,
        }
    }
}

impl Element for Splitter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Splitter"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        let format = self.input.format();
        for output in &mut self.outputs {
            output.set_format(format);
        }
        true
    }

    fn process(&mut self, _allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        let Some(buffer) = self.input.pull_buffer() else {
            return;
        };
        for output in &mut self.outputs {
            output.push_buffer(buffer.clone());
        }
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        self.outputs.len()
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
        &self.outputs[index]
    }

    fn output_port_mut(&mut self, index: usize) -> &mut Port {
        &mut self.outputs[index]
    }
}

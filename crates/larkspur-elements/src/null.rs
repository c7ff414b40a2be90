use larkspur_core::{random_string, BufferAllocator, Element, EventQueue, Port};

/// Discards any buffer pushed into its input port.
pub struct Null {
    name: String,
    id: String,
    input: Port,
}

impl Null {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, random_string(10))
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
        }
    }
}

impl Element for Null {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Null"
    }

    fn process(&mut self, allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        if let Some(buffer) = self.input.pull_buffer() {
            allocator.recycle(buffer);
        }
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn num_output_ports(&self) -> usize {
        0
    }

    fn input_port(&self, index: usize) -> &Port {
        assert!(index == 0, "no such input port");
        &self.input
    }

    fn input_port_mut(&mut self, index: usize) -> &mut Port {
        assert!(index == 0, "no such input port");
        &mut self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swallows_buffers() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut null = Null::new("null");

        assert_eq!(null.num_output_ports(), 0);
        null.input_port_mut(0).push_buffer(allocator.allocate(8));
        null.process(&mut allocator, &mut events, 1);
        assert!(!null.input_port(0).has_buffers());
    }
}

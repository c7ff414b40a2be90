use crate::buffer::BufferHandle;
use crate::format::Format;

/// Static description of a port, used by element descriptors and
/// creation args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub name: String,
}

impl PortDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Out-of-band message traveling alongside the audio data in a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortControlMessage {
    pub message: String,
}

/// A single-slot buffer holder connecting elements.
///
/// The graph *pulls* from source (output) ports and *pushes* into
/// destination (input) ports; an element pulls from its input ports and
/// pushes into its output ports. The single slot gives natural
/// per-element backpressure: a port is either empty or full, and pushing
/// into a full port fails.
#[derive(Debug, Default, Clone)]
pub struct Port {
    name: String,
    format: Format,
    buffer: Option<BufferHandle>,
    messages: Vec<PortControlMessage>,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Push a buffer into the port. Returns `false` if the slot is
    /// already occupied.
    pub fn push_buffer(&mut self, buffer: BufferHandle) -> bool {
        if self.buffer.is_some() {
            return false;
        }
        self.buffer = Some(buffer);
        true
    }

    /// Pull the buffer out of the port, leaving it empty.
    pub fn pull_buffer(&mut self) -> Option<BufferHandle> {
        self.buffer.take()
    }

    pub fn has_buffers(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port's negotiated data format. Undefined until the graph has
    /// been prepared.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Record the result of the format negotiation. Only called during
    /// graph preparation.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Format compatibility check against a suggested upstream format.
    /// The default port accepts anything.
    pub fn can_accept(&self, _format: &Format) -> bool {
        true
    }

    pub fn push_message(&mut self, message: PortControlMessage) {
        self.messages.push(message);
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Drain all pending control messages into `out` in FIFO order.
    pub fn transfer_messages(&mut self, out: &mut Vec<PortControlMessage>) {
        out.append(&mut self.messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocator;

    #[test]
    fn slot_count_stays_in_zero_or_one() {
        let mut allocator = BufferAllocator::new();
        let mut port = Port::new("out");
        assert!(!port.has_buffers());
        assert!(port.pull_buffer().is_none());

        assert!(port.push_buffer(allocator.allocate(8)));
        assert!(port.is_full());
        assert!(!port.push_buffer(allocator.allocate(8)));

        assert!(port.pull_buffer().is_some());
        assert!(!port.has_buffers());
        assert!(port.pull_buffer().is_none());
    }

    #[test]
    fn messages_drain_fifo() {
        let mut port = Port::new("in");
        port.push_message(PortControlMessage {
            message: "a".into(),
        });
        port.push_message(PortControlMessage {
            message: "b".into(),
        });
        let mut out = Vec::new();
        port.transfer_messages(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message, "a");
        assert_eq!(out[1].message, "b");
        assert!(!port.has_messages());
    }
}

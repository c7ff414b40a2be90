use std::collections::VecDeque;

use larkspur_core::{
    random_string, BufferAllocator, BufferHandle, Element, EventQueue, Port, PrepareParams,
};
use larkspur_core::Loader;

/// A FIFO buffer store decoupling a producer from a slower consumer.
///
/// The queue ingests one buffer from its input on every tick regardless
/// of downstream backpressure (the graph scheduler exempts Queue
/// elements from the backpressure skip) and forwards the oldest queued
/// buffer whenever its output slot is free. Queueing is unbounded;
/// in practice it is bounded by the upstream production rate and the
/// consumer drain rate.
pub struct Queue {
    name: String,
    id: String,
    input: Port,
    output: Port,
    queue: VecDeque<BufferHandle>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, random_string(10))
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            queue: VecDeque::new(),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Element for Queue {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Queue"
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> bool {
        self.output.set_format(self.input.format());
        true
    }

    fn process(&mut self, _allocator: &mut BufferAllocator, _events: &mut EventQueue, _ms: u32) {
        if let Some(buffer) = self.input.pull_buffer() {
            self.queue.push_back(buffer);
        }
        if !self.output.is_full() {
            if let Some(buffer) = self.queue.pop_front() {
                self.output.push_buffer(buffer);
            }
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

    #[test]
    fn forwards_in_fifo_order() {
        let mut allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut queue = Queue::new("queue");

        let first = allocator.allocate(2);
        let second = allocator.allocate(4);

        queue.input_port_mut(0).push_buffer(first);
        queue.process(&mut allocator, &mut events, 1);
        // first moved straight through to the output slot.
        assert!(queue.is_empty());

        queue.input_port_mut(0).push_buffer(second);
        queue.process(&mut allocator, &mut events, 1);
        // output still occupied, second is held in the queue.
        assert_eq!(queue.queue_size(), 1);

        let out = queue.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(out.byte_size(), 2);

        queue.process(&mut allocator, &mut events, 1);
        let out = queue.output_port_mut(0).pull_buffer().unwrap();
        assert_eq!(out.byte_size(), 4);
        assert!(queue.is_empty());
    }
}

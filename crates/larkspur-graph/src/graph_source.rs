use larkspur_core::{
    BufferAllocator, BufferHandle, Element, ElementEvent, EventQueue, Format, Loader,
    PrepareParams,
};

use crate::graph::{Graph, GraphError};
use crate::source::{Source, SourceCommand, SourceError};

/// Adapts a prepared [`Graph`] into a byte-pull [`Source`] at the
/// graph's output format.
///
/// Each fill rounds the requested byte count down to whole
/// milliseconds, runs one graph tick of that length and copies the
/// produced buffer out. A buffer larger than the request is retained
/// and served across subsequent calls. When the graph produces nothing
/// but is not yet done, the request is answered with silence so the
/// device stream does not pause itself on a transient underrun.
pub struct AudioGraphSource {
    name: String,
    graph: Graph,
    format: Format,
    allocator: BufferAllocator,
    events: EventQueue,
    pending: Option<BufferHandle>,
    pending_offset: usize,
    millisecs: u64,
}

impl AudioGraphSource {
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        Self {
            name: name.into(),
            graph,
            format: Format::default(),
            allocator: BufferAllocator::new(),
            events: EventQueue::new(),
            pending: None,
            pending_offset: 0,
            millisecs: 0,
        }
    }

    /// Prepare the wrapped graph and adopt its output format.
    pub fn prepare_graph(
        &mut self,
        loader: &dyn Loader,
        params: &PrepareParams,
    ) -> Result<(), GraphError> {
        self.graph.prepare_graph(loader, params)?;
        self.format = self.graph.format();
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Total milliseconds of audio the graph has been asked to produce.
    pub fn millisecs(&self) -> u64 {
        self.millisecs
    }
}

impl Source for AudioGraphSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> Format {
        self.format
    }

    fn fill_buffer(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        let ms_bytes = self.format.millisecond_bytes() as usize;
        if ms_bytes == 0 {
            return Err(SourceError::Failed(format!(
                "audio graph source '{}' has no valid output format",
                self.name
            )));
        }

        // serve the remainder of a previously oversized buffer first.
        if let Some(buffer) = &self.pending {
            let available = buffer.byte_size() - self.pending_offset;
            let count = available.min(dst.len());
            dst[..count]
                .copy_from_slice(&buffer.as_bytes()[self.pending_offset..self.pending_offset + count]);
            self.pending_offset += count;
            if self.pending_offset == buffer.byte_size() {
                let buffer = self.pending.take().expect("pending buffer");
                self.allocator.recycle(buffer);
                self.pending_offset = 0;
            }
            return Ok(count);
        }

        let milliseconds = (dst.len() / ms_bytes) as u32;
        self.graph
            .process(&mut self.allocator, &mut self.events, milliseconds);
        self.graph.advance(milliseconds);
        self.millisecs += u64::from(milliseconds);

        if let Some(buffer) = self.graph.output_port_mut(0).pull_buffer() {
            let count = buffer.byte_size().min(dst.len());
            dst[..count].copy_from_slice(&buffer.as_bytes()[..count]);
            if count < buffer.byte_size() {
                self.pending = Some(buffer);
                self.pending_offset = count;
            } else {
                self.allocator.recycle(buffer);
            }
            Ok(count)
        } else if !self.graph.is_done() {
            // no output this tick but the graph is still going; hand
            // the device silence so the stream does not pause itself.
            dst.fill(0);
            Ok(dst.len())
        } else {
            log::debug!(
                "audio graph has no more output buffers. [graph={}]",
                self.name
            );
            Ok(0)
        }
    }

    fn has_more(&self, _bytes_read: u64) -> bool {
        self.pending.is_some() || !self.graph.is_done()
    }

    fn shutdown(&mut self) {
        self.graph.shutdown();
    }

    fn recv_command(&mut self, cmd: SourceCommand) {
        let SourceCommand { dest, mut command } = cmd;
        if !self.graph.dispatch_command(&dest, &mut command) {
            log::warn!(
                "audio graph command receiver element not found. [graph={}, dest={}]",
                self.name,
                dest
            );
        }
    }

    fn next_event(&mut self) -> Option<ElementEvent> {
        self.events.pop_front()
    }
}

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use thiserror::Error;

use larkspur_core::{
    random_string, BufferAllocator, Command, Element, EventQueue, Format, InfoTag, Loader, Port,
    PrepareParams,
};
use larkspur_elements::{create_element, Queue};

use crate::graph_class::GraphClass;

/// Errors raised while preparing a graph for playback.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("audio graph has a cycle")]
    Cycle,
    #[error("audio graph output port is not linked to any element")]
    MissingOutput,
    #[error("audio graph element '{0}' failed to prepare")]
    ElementPrepare(String),
    #[error("audio graph link between incompatible ports. [src={src}, dst={dst}]")]
    IncompatibleFormats { src: String, dst: String },
    #[error("audio graph output format is not valid")]
    InvalidOutputFormat,
}

/// Identifies one port of one element by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PortKey {
    elem: usize,
    port: usize,
}

/// Where a linked source port delivers its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortTarget {
    Element(PortKey),
    /// The graph's own external output port.
    GraphOutput,
}

enum DescribeNode {
    Elem(usize),
    GraphSelf,
}

/// Produce PCM audio through the evaluation of a network of elements.
///
/// Elements are linked output port to input port; on every processing
/// tick they are evaluated in topological order and the produced
/// buffers are moved across the links. The graph is itself an
/// [`Element`] (a source) whose single output port mirrors the
/// designated external output, so graphs nest.
pub struct Graph {
    name: String,
    id: String,
    elements: Vec<Box<dyn Element>>,
    /// which elements does an element depend on?
    src_map: AHashMap<usize, AHashSet<usize>>,
    /// which elements depend on an element?
    dst_map: AHashMap<usize, AHashSet<usize>>,
    /// maps source (output) ports to their destination ports.
    port_map: AHashMap<PortKey, PortTarget>,
    /// evaluation order, valid after preparation.
    topo_order: Vec<usize>,
    /// negotiated output format, valid after preparation.
    format: Format,
    /// the tail port the graph's output buffers land in.
    output: Port,
    done: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, random_string(10))
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            elements: Vec::new(),
            src_map: AHashMap::new(),
            dst_map: AHashMap::new(),
            port_map: AHashMap::new(),
            topo_order: Vec::new(),
            format: Format::default(),
            output: Port::new("port"),
            done: false,
        }
    }

    /// Instantiate a graph from its declarative class: create every
    /// element through the factory, apply the links and designate the
    /// graph output. Broken references are skipped with a warning.
    pub fn from_class(name: impl Into<String>, klass: &GraphClass) -> Self {
        let mut graph = Self::new(name);
        for create in klass.elements() {
            match create_element(create) {
                Some(element) => {
                    graph.add_element_ptr(element);
                }
                None => log::warn!(
                    "graph class element could not be created. [graph={}, type={}]",
                    graph.name,
                    create.kind
                ),
            }
        }
        for link in klass.links() {
            let src = graph.find_element_index_by_id(&link.src_element);
            let dst = graph.find_element_index_by_id(&link.dst_element);
            let (Some(src), Some(dst)) = (src, dst) else {
                log::warn!(
                    "graph class link refers to unknown elements. [graph={}, link={}]",
                    graph.name,
                    link.id
                );
                continue;
            };
            let src_port = graph.elements[src].find_output_port_index(&link.src_port);
            let dst_port = graph.elements[dst].find_input_port_index(&link.dst_port);
            let (Some(src_port), Some(dst_port)) = (src_port, dst_port) else {
                log::warn!(
                    "graph class link refers to unknown ports. [graph={}, link={}]",
                    graph.name,
                    link.id
                );
                continue;
            };
            graph.link_elements(src, src_port, dst, dst_port);
        }
        if let Some(out) = graph.find_element_index_by_id(klass.graph_output_element_id()) {
            if let Some(port) =
                graph.elements[out].find_output_port_index(klass.graph_output_element_port())
            {
                graph.link_graph(out, port);
            }
        }
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The negotiated output format. Valid only after preparation.
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Add a new element to the graph. The element is not yet linked
    /// anywhere; you'll likely want to link it after this. Returns the
    /// element's index within the graph.
    pub fn add_element(&mut self, element: impl Element + 'static) -> usize {
        self.add_element_ptr(Box::new(element))
    }

    pub fn add_element_ptr(&mut self, element: Box<dyn Element>) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn element(&self, index: usize) -> &dyn Element {
        self.elements[index].as_ref()
    }

    pub fn element_mut(&mut self, index: usize) -> &mut dyn Element {
        self.elements[index].as_mut()
    }

    pub fn find_element_by_name(&self, name: &str) -> Option<&dyn Element> {
        self.elements
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.as_ref())
    }

    pub fn find_element_by_id(&self, id: &str) -> Option<&dyn Element> {
        self.elements
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.as_ref())
    }

    fn find_element_index_by_name(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name() == name)
    }

    fn find_element_index_by_id(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.id() == id)
    }

    /// Link a source element's output port to a destination element's
    /// input port. A source port participates in at most one link and
    /// re-linking replaces the previous destination.
    pub fn link_elements(
        &mut self,
        src_elem: usize,
        src_port: usize,
        dst_elem: usize,
        dst_port: usize,
    ) {
        assert!(src_port < self.elements[src_elem].num_output_ports());
        assert!(dst_port < self.elements[dst_elem].num_input_ports());
        self.src_map.entry(dst_elem).or_default().insert(src_elem);
        self.dst_map.entry(src_elem).or_default().insert(dst_elem);
        self.port_map.insert(
            PortKey {
                elem: src_elem,
                port: src_port,
            },
            PortTarget::Element(PortKey {
                elem: dst_elem,
                port: dst_port,
            }),
        );
    }

    /// Link an element's output port to the graph's external output.
    /// Normally this is the tail element of the graph.
    pub fn link_graph(&mut self, src_elem: usize, src_port: usize) {
        assert!(src_port < self.elements[src_elem].num_output_ports());
        self.port_map.insert(
            PortKey {
                elem: src_elem,
                port: src_port,
            },
            PortTarget::GraphOutput,
        );
    }

    /// Convenience linking by element and port names. Returns true when
    /// all names resolved. In case of duplicated names the first match
    /// wins.
    pub fn link_elements_by_name(
        &mut self,
        src_elem: &str,
        src_port: &str,
        dst_elem: &str,
        dst_port: &str,
    ) -> bool {
        let (Some(src), Some(dst)) = (
            self.find_element_index_by_name(src_elem),
            self.find_element_index_by_name(dst_elem),
        ) else {
            return false;
        };
        let (Some(src_port), Some(dst_port)) = (
            self.elements[src].find_output_port_index(src_port),
            self.elements[dst].find_input_port_index(dst_port),
        ) else {
            return false;
        };
        self.link_elements(src, src_port, dst, dst_port);
        true
    }

    /// Convenience graph-output linking by names.
    pub fn link_graph_by_name(&mut self, src_elem: &str, src_port: &str) -> bool {
        let Some(src) = self.find_element_index_by_name(src_elem) else {
            return false;
        };
        let Some(src_port) = self.elements[src].find_output_port_index(src_port) else {
            return false;
        };
        self.link_graph(src, src_port);
        true
    }

    /// Prepare the graph for playback after all elements have been
    /// added and linked: order the elements topologically, prepare each
    /// one and negotiate the port formats along every link.
    ///
    /// The graph does not partially prepare; on error nothing is
    /// playable.
    pub fn prepare_graph(
        &mut self,
        loader: &dyn Loader,
        params: &PrepareParams,
    ) -> Result<(), GraphError> {
        if !self
            .port_map
            .values()
            .any(|target| matches!(target, PortTarget::GraphOutput))
        {
            log::error!(
                "failed to determine audio graph output port. no output element selected. [graph={}]",
                self.name
            );
            return Err(GraphError::MissingOutput);
        }

        // Kahn's algorithm over the dependency map.
        let mut edges = self.src_map.clone();
        let mut ready: Vec<usize> = (0..self.elements.len())
            .filter(|index| !edges.contains_key(index))
            .collect();
        let mut order = Vec::with_capacity(self.elements.len());
        while let Some(index) = ready.pop() {
            order.push(index);
            edges.retain(|&dst, srcs| {
                srcs.remove(&index);
                if srcs.is_empty() {
                    ready.push(dst);
                    false
                } else {
                    true
                }
            });
        }
        if !edges.is_empty() {
            log::error!("audio graph cycle detected. [graph={}]", self.name);
            return Err(GraphError::Cycle);
        }

        log::debug!("preparing audio graph. [graph={}]", self.name);

        for &index in &order {
            if !self.elements[index].prepare(loader, params) {
                log::error!(
                    "audio graph element failed to prepare. [graph={}, elem={}]",
                    self.name,
                    self.elements[index].name()
                );
                return Err(GraphError::ElementPrepare(
                    self.elements[index].name().to_owned(),
                ));
            }
            for port in 0..self.elements[index].num_output_ports() {
                let format = self.elements[index].output_port(port).format();
                let src_name = format!(
                    "{}:{}",
                    self.elements[index].name(),
                    self.elements[index].output_port(port).name()
                );
                match self.port_map.get(&PortKey { elem: index, port }).copied() {
                    Some(PortTarget::Element(key)) => {
                        let dst_name = format!(
                            "{}:{}",
                            self.elements[key.elem].name(),
                            self.elements[key.elem].input_port(key.port).name()
                        );
                        if !self.elements[key.elem]
                            .input_port(key.port)
                            .can_accept(&format)
                        {
                            log::error!(
                                "audio graph element link between incompatible ports. [src={src_name}, dst={dst_name}]"
                            );
                            return Err(GraphError::IncompatibleFormats {
                                src: src_name,
                                dst: dst_name,
                            });
                        }
                        self.elements[key.elem]
                            .input_port_mut(key.port)
                            .set_format(format);
                    }
                    Some(PortTarget::GraphOutput) => {
                        if !self.output.can_accept(&format) {
                            return Err(GraphError::IncompatibleFormats {
                                src: src_name,
                                dst: format!("{}:port", self.name),
                            });
                        }
                        self.output.set_format(format);
                    }
                    None => {
                        log::warn!(
                            "audio graph element output port has no destination port assigned. [graph={}, port={src_name}]",
                            self.name
                        );
                    }
                }
            }
            for port in 0..self.elements[index].num_input_ports() {
                let connected = self.port_map.values().any(|target| {
                    matches!(target, PortTarget::Element(key) if key.elem == index && key.port == port)
                });
                if !connected {
                    log::warn!(
                        "audio graph element input port has no source port assigned. [graph={}, elem={}, port={}]",
                        self.name,
                        self.elements[index].name(),
                        self.elements[index].input_port(port).name()
                    );
                }
            }
        }

        self.topo_order = order;
        self.format = self.output.format();
        if !self.format.is_valid() {
            log::error!(
                "audio graph output format is not valid. [graph={}, format={}]",
                self.name,
                self.format
            );
            return Err(GraphError::InvalidOutputFormat);
        }
        log::debug!(
            "audio graph prepared successfully. [graph={}, output={}]",
            self.name,
            self.format
        );
        Ok(())
    }

    /// True when every source is done, every queue is empty and every
    /// output port has been drained.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The indices of the elements that depend on the given element.
    pub fn dependents(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.dst_map.get(&index).into_iter().flatten().copied()
    }

    /// The indices of the elements the given element depends on.
    pub fn dependencies(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.src_map.get(&index).into_iter().flatten().copied()
    }

    /// Render the route table between elements and their ports.
    pub fn describe(&self) -> Vec<String> {
        let mut ret = Vec::new();
        for index in 0..self.elements.len() {
            if self.src_map.contains_key(&index) {
                continue;
            }
            ret.extend(self.describe_paths(DescribeNode::Elem(index)));
        }
        ret
    }

    fn describe_paths(&self, node: DescribeNode) -> Vec<String> {
        let index = match node {
            // the graph's own external port has no further destination.
            DescribeNode::GraphSelf => return vec![format!("{}:port -> nil", self.name)],
            DescribeNode::Elem(index) => index,
        };
        let element = &self.elements[index];
        let mut ret = Vec::new();
        for port in 0..element.num_output_ports() {
            let src = format!("{}:{}", element.name(), element.output_port(port).name());
            match self.port_map.get(&PortKey { elem: index, port }) {
                None => ret.push(format!("{src} -> nil")),
                Some(PortTarget::GraphOutput) => {
                    for path in self.describe_paths(DescribeNode::GraphSelf) {
                        ret.push(format!("{src} -> {}:port {path}", self.name));
                    }
                }
                Some(PortTarget::Element(key)) => {
                    let dst = format!(
                        "{}:{}",
                        self.elements[key.elem].name(),
                        self.elements[key.elem].input_port(key.port).name()
                    );
                    for path in self.describe_paths(DescribeNode::Elem(key.elem)) {
                        ret.push(format!("{src} -> {dst} {path}"));
                    }
                }
            }
        }
        ret
    }
}

impl Element for Graph {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "Graph"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        self.done
    }

    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> bool {
        self.prepare_graph(loader, params).is_ok()
    }

    fn process(&mut self, allocator: &mut BufferAllocator, events: &mut EventQueue, ms: u32) {
        // evaluate the elements in topological order and dispatch the
        // buffers according to the element and port links.
        for position in 0..self.topo_order.len() {
            let index = self.topo_order[position];

            // this element could be done while the pipeline still has
            // pending buffers in the port slots.
            if self.elements[index].is_source() && self.elements[index].is_source_done() {
                continue;
            }

            // a full destination port means the consumer has not taken
            // the previous buffer; skip the producer for this tick.
            // Queues are exempt so they can keep ingesting from their
            // upstream while the downstream drains at its own pace.
            let mut backpressure = false;
            for port in 0..self.elements[index].num_output_ports() {
                let Some(&target) = self.port_map.get(&PortKey { elem: index, port }) else {
                    continue;
                };
                let full = match target {
                    PortTarget::Element(key) => {
                        self.elements[key.elem].input_port(key.port).is_full()
                    }
                    PortTarget::GraphOutput => self.output.is_full(),
                };
                if full {
                    backpressure = true;
                    break;
                }
            }
            if backpressure && self.elements[index].kind() != "Queue" {
                continue;
            }

            self.elements[index].process(allocator, events, ms);

            for port in 0..self.elements[index].num_output_ports() {
                let Some(mut buffer) = self.elements[index].output_port_mut(port).pull_buffer()
                else {
                    continue;
                };
                {
                    let element = &self.elements[index];
                    Arc::make_mut(&mut buffer).add_info_tag(InfoTag {
                        element_name: element.name().to_owned(),
                        element_id: element.id().to_owned(),
                        source: element.is_source(),
                        source_done: element.is_source_done(),
                    });
                }
                let Some(&target) = self.port_map.get(&PortKey { elem: index, port }) else {
                    continue;
                };
                let retry = buffer.clone();
                let pushed = match target {
                    PortTarget::Element(key) => self.elements[key.elem]
                        .input_port_mut(key.port)
                        .push_buffer(buffer),
                    PortTarget::GraphOutput => self.output.push_buffer(buffer),
                };
                if !pushed {
                    // should not happen under the backpressure rules;
                    // keep the buffer for retry on the next tick.
                    self.elements[index].output_port_mut(port).push_buffer(retry);
                }
            }
        }

        let mut graph_done = true;
        for &index in &self.topo_order {
            let element = &self.elements[index];
            if element.is_source() && !element.is_source_done() {
                graph_done = false;
            }
            if let Some(queue) = element.downcast_ref::<Queue>() {
                if !queue.is_empty() {
                    graph_done = false;
                }
            }
            if !graph_done {
                break;
            }
            for port in 0..element.num_output_ports() {
                if element.output_port(port).has_buffers() {
                    graph_done = false;
                    break;
                }
            }
            if !graph_done {
                break;
            }
        }
        if graph_done && !self.done {
            log::debug!("audio graph is done. [graph={}]", self.name);
        }
        self.done = graph_done;
    }

    fn advance(&mut self, milliseconds: u32) {
        for element in &mut self.elements {
            element.advance(milliseconds);
        }
    }

    fn shutdown(&mut self) {
        for position in 0..self.topo_order.len() {
            let index = self.topo_order[position];
            log::debug!(
                "shutting down audio graph element. [graph={}, elem={}]",
                self.name,
                self.elements[index].name()
            );
            self.elements[index].shutdown();
        }
    }

    fn dispatch_command(&mut self, dest: &str, cmd: &mut Command) -> bool {
        // see if the receiver of the command is a direct descendant.
        for element in &mut self.elements {
            if element.name() != dest {
                continue;
            }
            element.receive_command(cmd);
            return true;
        }
        // try to dispatch the command recursively.
        for element in &mut self.elements {
            if element.dispatch_command(dest, cmd) {
                return true;
            }
        }
        false
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

use serde_json::{json, Map, Value};
use thiserror::Error;

use larkspur_core::{
    hash_combine, random_string, AudioCaches, BufferAllocator, EventQueue, Loader, PrepareParams,
};
use larkspur_elements::{create_element, find_element_desc, ElementArg, ElementCreateArgs};

/// Errors raised while reading a graph class back from JSON.
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("missing or malformed graph class field '{0}'")]
    MissingField(&'static str),
    #[error("graph class refers to an unknown element type '{0}'")]
    UnknownElementType(String),
}

/// An oriented connection between two element ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphLink {
    pub id: String,
    pub src_element: String,
    pub src_port: String,
    pub dst_element: String,
    pub dst_port: String,
}

/// Parameters for warming the decoded-PCM cache ahead of playback.
#[derive(Default, Clone)]
pub struct PreloadParams {
    pub enable_pcm_caching: bool,
    pub caches: AudioCaches,
}

/// A declarative, serializable description of an audio graph: an
/// ordered list of elements to create, an ordered list of links
/// between their ports, and the designated graph output port.
#[derive(Debug, Clone, Default)]
pub struct GraphClass {
    name: String,
    id: String,
    src_elem_id: String,
    src_elem_port: String,
    links: Vec<GraphLink>,
    elements: Vec<ElementCreateArgs>,
}

impl GraphClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, random_string(10))
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph_output_element_id(&self) -> &str {
        &self.src_elem_id
    }

    pub fn graph_output_element_port(&self) -> &str {
        &self.src_elem_port
    }

    pub fn set_graph_output_element_id(&mut self, id: impl Into<String>) {
        self.src_elem_id = id.into();
    }

    pub fn set_graph_output_element_port(&mut self, port: impl Into<String>) {
        self.src_elem_port = port.into();
    }

    pub fn add_element(&mut self, element: ElementCreateArgs) -> &ElementCreateArgs {
        self.elements.push(element);
        self.elements.last().unwrap()
    }

    pub fn add_link(&mut self, link: GraphLink) {
        self.links.push(link);
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn element(&self, index: usize) -> &ElementCreateArgs {
        &self.elements[index]
    }

    pub fn element_mut(&mut self, index: usize) -> &mut ElementCreateArgs {
        &mut self.elements[index]
    }

    pub fn link(&self, index: usize) -> &GraphLink {
        &self.links[index]
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementCreateArgs> {
        self.elements.iter()
    }

    pub fn links(&self) -> impl Iterator<Item = &GraphLink> {
        self.links.iter()
    }

    pub fn find_element_by_id(&self, id: &str) -> Option<&ElementCreateArgs> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn find_link_by_id(&self, id: &str) -> Option<&GraphLink> {
        self.links.iter().find(|l| l.id == id)
    }

    /// An exact copy sharing the class identity.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// A copy under a fresh class id.
    pub fn clone_class(&self) -> Self {
        let mut ret = self.clone();
        ret.id = random_string(10);
        ret
    }

    /// Combined identity hash over the class contents. Element and link
    /// order matter; the order of an element's argument map does not
    /// (keys are sorted before hashing).
    pub fn hash(&self) -> u64 {
        let mut hash = 0u64;
        hash = hash_combine(hash, &self.name);
        hash = hash_combine(hash, &self.id);
        hash = hash_combine(hash, &self.src_elem_id);
        hash = hash_combine(hash, &self.src_elem_port);
        for link in &self.links {
            hash = hash_combine(hash, &link.id);
            hash = hash_combine(hash, &link.src_port);
            hash = hash_combine(hash, &link.src_element);
            hash = hash_combine(hash, &link.dst_port);
            hash = hash_combine(hash, &link.dst_element);
        }
        for element in &self.elements {
            hash = hash_combine(hash, &element.id);
            hash = hash_combine(hash, &element.name);
            hash = hash_combine(hash, &element.kind);
            let mut keys: Vec<&String> = element.args.keys().collect();
            keys.sort();
            for key in keys {
                hash = hash_combine(hash, &element.args[key]);
            }
        }
        hash
    }

    /// Serialize into the stable JSON object format.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        root.insert("name".into(), json!(self.name));
        root.insert("id".into(), json!(self.id));
        root.insert("src_elem_id".into(), json!(self.src_elem_id));
        root.insert("src_elem_port".into(), json!(self.src_elem_port));

        let links: Vec<Value> = self
            .links
            .iter()
            .map(|link| {
                json!({
                    "id": link.id,
                    "src_elem": link.src_element,
                    "src_port": link.src_port,
                    "dst_elem": link.dst_element,
                    "dst_port": link.dst_port,
                })
            })
            .collect();
        root.insert("links".into(), Value::Array(links));

        let elements: Vec<Value> = self
            .elements
            .iter()
            .map(|element| {
                let mut object = Map::new();
                object.insert("id".into(), json!(element.id));
                object.insert("name".into(), json!(element.name));
                object.insert("type".into(), json!(element.kind));
                for (key, arg) in &element.args {
                    object.insert(format!("arg_{key}"), arg_to_json(arg));
                }
                Value::Object(object)
            })
            .collect();
        root.insert("elements".into(), Value::Array(elements));
        Value::Object(root)
    }

    /// Read a graph class back from JSON. Element arguments are parsed
    /// through the element type's descriptor, which supplies the
    /// argument names and expected types; missing or malformed
    /// arguments keep their descriptor defaults.
    pub fn from_json(value: &Value) -> Result<Self, ClassError> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or(ClassError::MissingField("name"))?;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ClassError::MissingField("id"))?;
        let mut ret = Self::with_id(name, id);
        ret.src_elem_id = value
            .get("src_elem_id")
            .and_then(Value::as_str)
            .ok_or(ClassError::MissingField("src_elem_id"))?
            .to_owned();
        ret.src_elem_port = value
            .get("src_elem_port")
            .and_then(Value::as_str)
            .ok_or(ClassError::MissingField("src_elem_port"))?
            .to_owned();

        let string = |object: &Value, key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };

        if let Some(links) = value.get("links").and_then(Value::as_array) {
            for link in links {
                ret.links.push(GraphLink {
                    id: string(link, "id"),
                    src_element: string(link, "src_elem"),
                    src_port: string(link, "src_port"),
                    dst_element: string(link, "dst_elem"),
                    dst_port: string(link, "dst_port"),
                });
            }
        }

        if let Some(elements) = value.get("elements").and_then(Value::as_array) {
            for element in elements {
                let kind = string(element, "type");
                // the descriptor conveniently gives us the argument
                // names *and* the expected types for reading the args
                // back out of the JSON.
                let Some(desc) = find_element_desc(&kind) else {
                    return Err(ClassError::UnknownElementType(kind));
                };
                let mut create = ElementCreateArgs {
                    id: string(element, "id"),
                    name: string(element, "name"),
                    kind,
                    args: desc.args,
                    input_ports: desc.input_ports,
                    output_ports: desc.output_ports,
                };
                for (key, arg) in create.args.iter_mut() {
                    let Some(raw) = element.get(format!("arg_{key}").as_str()) else {
                        continue;
                    };
                    match arg_from_json(arg, raw) {
                        Some(parsed) => *arg = parsed,
                        None => log::warn!(
                            "graph class element argument is malformed. [elem={}, arg={}]",
                            create.name,
                            key
                        ),
                    }
                }
                ret.elements.push(create);
            }
        }
        Ok(ret)
    }

    /// Decode and cache the PCM contents of every file source in the
    /// class that has PCM caching enabled, so instantiating the graph
    /// later does not have to block on the decoder.
    pub fn preload(&self, loader: &dyn Loader, params: &PreloadParams) {
        for create in &self.elements {
            if create.kind != "FileSource" {
                continue;
            }
            let caching = create
                .args
                .get("pcm_caching")
                .and_then(ElementArg::as_bool)
                .unwrap_or(false);
            if !caching || !params.enable_pcm_caching {
                continue;
            }
            let Some(mut element) = create_element(create) else {
                continue;
            };
            let prepare = PrepareParams {
                enable_pcm_caching: true,
                caches: params.caches.clone(),
            };
            if !element.prepare(loader, &prepare) {
                log::warn!(
                    "graph class preload failed. [class={}, elem={}]",
                    self.name,
                    create.name
                );
                continue;
            }
            let mut allocator = BufferAllocator::new();
            let mut events = EventQueue::new();
            let mut spins = 0;
            while !element.is_source_done() && spins < 100_000 {
                element.process(&mut allocator, &mut events, 1000);
                if let Some(buffer) = element.output_port_mut(0).pull_buffer() {
                    allocator.recycle(buffer);
                }
                spins += 1;
            }
            log::debug!(
                "graph class preloaded file source. [class={}, elem={}]",
                self.name,
                create.name
            );
        }
    }
}

fn arg_to_json(arg: &ElementArg) -> Value {
    match arg {
        ElementArg::String(v) => json!(v),
        ElementArg::Float(v) => json!(v),
        ElementArg::U32(v) => json!(v),
        ElementArg::Bool(v) => json!(v),
        ElementArg::SampleType(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        ElementArg::Format(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        ElementArg::IOStrategy(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        ElementArg::StereoChannel(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        ElementArg::EffectKind(v) => serde_json::to_value(v).unwrap_or(Value::Null),
    }
}

/// Parse a JSON value into the variant dictated by the descriptor's
/// template argument.
fn arg_from_json(template: &ElementArg, value: &Value) -> Option<ElementArg> {
    let arg = match template {
        ElementArg::String(_) => ElementArg::String(value.as_str()?.to_owned()),
        ElementArg::Float(_) => ElementArg::Float(value.as_f64()? as f32),
        ElementArg::U32(_) => ElementArg::U32(u32::try_from(value.as_u64()?).ok()?),
        ElementArg::Bool(_) => ElementArg::Bool(value.as_bool()?),
        ElementArg::SampleType(_) => {
            ElementArg::SampleType(serde_json::from_value(value.clone()).ok()?)
        }
        ElementArg::Format(_) => ElementArg::Format(serde_json::from_value(value.clone()).ok()?),
        ElementArg::IOStrategy(_) => {
            ElementArg::IOStrategy(serde_json::from_value(value.clone()).ok()?)
        }
        ElementArg::StereoChannel(_) => {
            ElementArg::StereoChannel(serde_json::from_value(value.clone()).ok()?)
        }
        ElementArg::EffectKind(_) => {
            ElementArg::EffectKind(serde_json::from_value(value.clone()).ok()?)
        }
    };
    Some(arg)
}

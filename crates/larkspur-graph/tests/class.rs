//! Graph class serialization, hashing and instantiation tests.

use larkspur_core::{random_string, FileLoader, Format, PrepareParams, SampleType};
use larkspur_elements::{find_element_desc, ElementArg, ElementCreateArgs};
use larkspur_graph::{ClassError, Graph, GraphClass, GraphLink};

const TEST_FORMAT: Format = Format::new(SampleType::Int16, 16000, 1);

fn zero_and_gain_class() -> (GraphClass, String, String, String) {
    let zero_id = random_string(10);
    let gain_id = random_string(10);
    let link_id = random_string(10);

    let mut klass = GraphClass::new("graph");

    let mut zero = ElementCreateArgs {
        id: zero_id.clone(),
        name: "zero".into(),
        kind: "ZeroSource".into(),
        ..Default::default()
    };
    let desc = find_element_desc("ZeroSource").unwrap();
    zero.args = desc.args;
    zero.output_ports = desc.output_ports;
    zero.args
        .insert("format".into(), ElementArg::Format(TEST_FORMAT));

    let mut gain = ElementCreateArgs {
        id: gain_id.clone(),
        name: "gain".into(),
        kind: "Gain".into(),
        ..Default::default()
    };
    let desc = find_element_desc("Gain").unwrap();
    gain.args = desc.args;
    gain.input_ports = desc.input_ports;
    gain.output_ports = desc.output_ports;
    gain.args.insert("gain".into(), ElementArg::Float(1.5));

    klass.add_element(zero);
    klass.add_element(gain);
    klass.add_link(GraphLink {
        id: link_id.clone(),
        src_element: zero_id.clone(),
        src_port: "out".into(),
        dst_element: gain_id.clone(),
        dst_port: "in".into(),
    });
    klass.set_graph_output_element_id(gain_id.clone());
    klass.set_graph_output_element_port("out");

    (klass, zero_id, gain_id, link_id)
}

#[test]
fn json_round_trip_preserves_everything() {
    let (klass, zero_id, gain_id, link_id) = zero_and_gain_class();

    let json = klass.to_json();
    let other = GraphClass::from_json(&json).unwrap();

    assert_eq!(other.num_elements(), 2);
    assert_eq!(other.num_links(), 1);
    assert_eq!(other.name(), "graph");
    assert_eq!(other.graph_output_element_id(), gain_id);
    assert_eq!(other.graph_output_element_port(), "out");

    let zero = other.find_element_by_id(&zero_id).unwrap();
    assert_eq!(zero.name, "zero");
    assert_eq!(zero.kind, "ZeroSource");
    assert_eq!(
        zero.args.get("format").and_then(ElementArg::as_format),
        Some(TEST_FORMAT)
    );

    let gain = other.find_element_by_id(&gain_id).unwrap();
    assert_eq!(gain.args.get("gain").and_then(ElementArg::as_f32), Some(1.5));

    let link = other.find_link_by_id(&link_id).unwrap();
    assert_eq!(link.src_element, zero_id);
    assert_eq!(link.dst_element, gain_id);

    assert_eq!(other.hash(), klass.hash());
}

#[test]
fn hash_ignores_argument_key_order() {
    let (mut klass, _, _, _) = zero_and_gain_class();
    let reference = klass.hash();

    // rebuild the gain element's argument map in reverse insertion
    // order; the hash must not move.
    let gain = klass.element_mut(1);
    let mut pairs: Vec<_> = gain.args.drain().collect();
    pairs.reverse();
    for (key, value) in pairs {
        gain.args.insert(key, value);
    }
    assert_eq!(klass.hash(), reference);
}

#[test]
fn hash_tracks_element_and_link_order() {
    let (klass, _, _, _) = zero_and_gain_class();
    let reference = klass.hash();

    // an equal class built with the elements swapped hashes
    // differently.
    let mut swapped = GraphClass::with_id(klass.name(), klass.id());
    swapped.set_graph_output_element_id(klass.graph_output_element_id());
    swapped.set_graph_output_element_port(klass.graph_output_element_port());
    swapped.add_element(klass.element(1).clone());
    swapped.add_element(klass.element(0).clone());
    swapped.add_link(klass.link(0).clone());
    assert_ne!(swapped.hash(), reference);
}

#[test]
fn hash_tracks_argument_values() {
    let (mut klass, _, _, _) = zero_and_gain_class();
    let reference = klass.hash();
    klass
        .element_mut(1)
        .args
        .insert("gain".into(), ElementArg::Float(0.5));
    assert_ne!(klass.hash(), reference);
}

#[test]
fn clone_class_gets_a_new_identity() {
    let (klass, _, _, _) = zero_and_gain_class();
    let copy = klass.copy();
    assert_eq!(copy.id(), klass.id());
    assert_eq!(copy.hash(), klass.hash());

    let clone = klass.clone_class();
    assert_ne!(clone.id(), klass.id());
    assert_ne!(clone.hash(), klass.hash());
}

#[test]
fn unknown_element_type_is_rejected() {
    let json = serde_json::json!({
        "name": "graph",
        "id": "123",
        "src_elem_id": "e1",
        "src_elem_port": "out",
        "links": [],
        "elements": [
            { "id": "e1", "name": "mystery", "type": "Reverb" }
        ],
    });
    assert!(matches!(
        GraphClass::from_json(&json),
        Err(ClassError::UnknownElementType(kind)) if kind == "Reverb"
    ));
}

#[test]
fn missing_fields_are_rejected() {
    let json = serde_json::json!({ "name": "graph" });
    assert!(matches!(
        GraphClass::from_json(&json),
        Err(ClassError::MissingField("id"))
    ));
}

#[test]
fn instantiates_into_a_working_graph() {
    let (klass, zero_id, gain_id, _) = zero_and_gain_class();

    let graph = Graph::from_class(klass.name().to_owned(), &klass);
    assert_eq!(graph.find_element_by_id(&zero_id).unwrap().kind(), "ZeroSource");
    assert_eq!(graph.find_element_by_id(&gain_id).unwrap().kind(), "Gain");

    let mut graph = graph;
    graph
        .prepare_graph(&FileLoader::new(), &PrepareParams::default())
        .unwrap();
    assert_eq!(graph.format(), TEST_FORMAT);

    let routes = graph.describe();
    assert_eq!(
        routes[0],
        "zero:out -> gain:in gain:out -> graph:port graph:port -> nil"
    );
}

#[test]
fn unlinked_extra_element_does_not_break_prepare() {
    let (mut klass, zero_id, _, _) = zero_and_gain_class();
    // point the graph output straight at the source, leaving the gain
    // element dangling.
    klass.set_graph_output_element_id(zero_id);
    klass.set_graph_output_element_port("out");

    let mut graph = Graph::from_class("test", &klass);
    assert!(graph
        .prepare_graph(&FileLoader::new(), &PrepareParams::default())
        .is_ok());
}

#[test]
fn class_without_output_element_fails_prepare() {
    let mut klass = GraphClass::new("graph");
    let desc = find_element_desc("ZeroSource").unwrap();
    let mut zero = ElementCreateArgs {
        id: "z1".into(),
        name: "zero".into(),
        kind: "ZeroSource".into(),
        ..Default::default()
    };
    zero.args = desc.args;
    zero.args
        .insert("format".into(), ElementArg::Format(TEST_FORMAT));
    klass.add_element(zero);

    let mut graph = Graph::from_class("test", &klass);
    assert!(graph
        .prepare_graph(&FileLoader::new(), &PrepareParams::default())
        .is_err());
}

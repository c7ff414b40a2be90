pub use larkspur_core as core;

pub use larkspur_core::*;
pub use larkspur_elements as elements;
pub use larkspur_graph::*;

#[cfg(feature = "cpal")]
pub use larkspur_cpal::*;

pub use larkspur_engine as engine;

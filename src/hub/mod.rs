pub mod endpoints;
pub mod graph;
pub mod observer;
pub mod registry;

pub use endpoints::*;
pub use graph::*;
pub use observer::*;
pub use registry::*;

#[cfg(test)]
mod graph_test;

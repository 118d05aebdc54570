//! stitch: bundles JavaScript and TypeScript modules reachable from an entry
//! file into a single script (plus optional side chunks) and a source map
//! mapping every generated position back to its original file.

pub mod config;
pub mod emitter;
pub mod error;
pub mod fs;
pub mod graph_builder;
pub mod module_graph;
pub mod orchestrator;
pub mod package_json;
pub mod resolver;
pub mod source_map;
pub mod types;
pub mod util;
pub mod visitors;

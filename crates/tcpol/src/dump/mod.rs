//! Read-only debug renderings of a parsed policy graph.
//!
//! Consumers outside the core (diagnostics, the CLI's `build` mode) want
//! either the full graph or a condensed qdisc/class tree. Both walks use
//! only the public read surface and never mutate; output is deterministic
//! for identical input.

mod graph;
mod hierarchy;

pub use graph::{context_to_string, write_context};
pub use hierarchy::{hierarchy_to_string, write_hierarchy};

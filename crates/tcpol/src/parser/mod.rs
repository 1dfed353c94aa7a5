//! IR parser / graph builder.
//!
//! Consumes the line-oriented policy IR and builds a [`crate::graph::Context`]
//! in a single top-to-bottom pass. Cross-references between entities defined
//! in arbitrary order are resolved at use time; class targets that are not
//! yet defined are satisfied by synthesizing placeholder qdiscs/classes
//! ("fudging") so the pass never blocks on definition order. The input is
//! trusted machine-generated text: the first malformed record aborts the
//! whole parse with a typed error, leaving no partial result.

mod ir;
mod lex;

pub use ir::IrParser;

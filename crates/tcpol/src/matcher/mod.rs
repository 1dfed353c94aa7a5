//! Packet classification against a built policy graph.
//!
//! A [`Matcher`] walks a single block's rules in definition order, extracts
//! match fields bit-precisely from the packet, and evaluates the matched
//! rule's action graph, policing against token buckets along the way.
//! Matching mutates only bucket runtime state, which the matcher owns.

mod engine;

pub use engine::{Matcher, Packet, Verdict};

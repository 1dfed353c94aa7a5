//! tcpol - traffic-control policy IR engine.
//!
//! This crate ingests a machine-generated, line-oriented intermediate
//! representation describing a traffic-control policy (queueing
//! disciplines, classes, token buckets, classification rules and actions
//! per interface direction), builds an in-memory policy graph in a single
//! pass, and evaluates that graph against live packets.
//!
//! # Architecture
//!
//! ```text
//! IR text ──> [IrParser] ──> [Context]  (immutable policy graph)
//!                                │
//!                  ┌─────────────┼──────────────┐
//!                  ▼             ▼              ▼
//!              [dump::*]    [Matcher] ──> [MeterState]
//!            (diagnostics)  (verdicts)   (bucket tokens)
//! ```
//!
//! # Key components
//!
//! - [`parser::IrParser`]: single-pass parser/graph-builder; resolves
//!   cross-references in arbitrary definition order, synthesizing
//!   placeholders for forward class references, and rejects duplicate or
//!   dangling indices with typed errors.
//! - [`graph::Context`]: the built graph - pragmas, buckets, offset groups
//!   and blocks, arena-allocated and immutable after the parse.
//! - [`codec`]: bit-aligned field extraction and dynamic offset
//!   resolution.
//! - [`policer::MeterState`]: waterfall token-bucket runtime state.
//! - [`matcher::Matcher`]: per-packet rule matching and recursive action
//!   evaluation producing a [`matcher::Verdict`].
//!
//! The IR is trusted machine-generated input: every defect is an upstream
//! bug, so parsing and evaluation fail fast with a
//! [`error::PolicyError`] instead of degrading. Time is supplied by the
//! caller on every evaluation, which keeps policing deterministic under a
//! mock clock.

pub mod codec;
pub mod dump;
pub mod error;
pub mod ext;
pub mod graph;
pub mod matcher;
pub mod parser;
pub mod policer;

pub use error::{EntityKind, PolicyError, PolicyResult};
pub use graph::{ClassId, Context, Direction};
pub use matcher::{Matcher, Packet, Verdict};
pub use parser::IrParser;

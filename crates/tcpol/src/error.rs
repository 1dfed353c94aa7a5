//! Error types for policy parsing and evaluation.
//!
//! All errors implement `std::error::Error` via `thiserror`. Every
//! operation in this crate is fail-fast: the IR is trusted machine-generated
//! input, so the first defect aborts the whole parse or evaluation rather
//! than yielding a partial graph or verdict. Callers that want structured
//! recovery observe the typed variants instead of a process abort.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// The namespace an index belongs to, for reference/duplicate diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Interface/direction policy scope.
    Block,
    /// Queueing discipline.
    Qdisc,
    /// Traffic class.
    Class,
    /// Token bucket.
    Bucket,
    /// Dynamically computed offset group.
    OffsetGroup,
    /// Classification action.
    Action,
}

impl EntityKind {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Qdisc => "qdisc",
            Self::Class => "class",
            Self::Bucket => "bucket",
            Self::OffsetGroup => "offset group",
            Self::Action => "action",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building or evaluating a policy graph.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A line does not match its record grammar.
    #[error("line {line_no}: malformed record: {reason}: {line:?}")]
    MalformedRecord {
        /// 1-based line number in the input stream.
        line_no: usize,
        /// The offending line, comment stripped.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An index is absent from the relevant namespace.
    #[error("unknown {kind} {index} referenced from {scope}")]
    UnknownReference {
        /// The namespace searched.
        kind: EntityKind,
        /// The index that did not resolve.
        index: u32,
        /// Where the reference came from.
        scope: String,
    },

    /// An index is reused within a namespace. This includes a real
    /// definition colliding with a placeholder created by forward-reference
    /// resolution.
    #[error("duplicate {kind} {index} in {scope}")]
    DuplicateIndex {
        /// The namespace the collision happened in.
        kind: EntityKind,
        /// The reused index.
        index: u32,
        /// The scope owning the namespace.
        scope: String,
    },

    /// A `(name, direction)` block pair is opened twice.
    #[error("duplicate block {name}/{direction}")]
    DuplicateBlock {
        /// Block name (interface).
        name: String,
        /// Block direction string.
        direction: String,
    },

    /// A construct the engine deliberately does not support.
    #[error("unsupported construct: {what}")]
    UnsupportedConstruct {
        /// Description of the construct.
        what: String,
    },

    /// A bit extraction exceeds the 32-bit representable window.
    #[error("bit field does not fit a 32-bit window: start {bit_start}, length {bit_length}")]
    Overflow {
        /// Absolute starting bit offset.
        bit_start: u64,
        /// Requested bit length.
        bit_length: u32,
    },

    /// The action graph of a block contains a reference cycle.
    #[error("cyclic action graph in block {block}: action {index}")]
    CyclicActionGraph {
        /// Location of the owning block.
        block: String,
        /// Registered index of an action on the cycle.
        index: u32,
    },

    /// The input stream could not be read.
    #[error("failed to read policy input: {source}")]
    Io {
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl PolicyError {
    /// Creates a malformed-record error.
    pub fn malformed(line_no: usize, line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line_no,
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown-reference error.
    pub fn unknown(kind: EntityKind, index: u32, scope: impl Into<String>) -> Self {
        Self::UnknownReference {
            kind,
            index,
            scope: scope.into(),
        }
    }

    /// Creates a duplicate-index error.
    pub fn duplicate(kind: EntityKind, index: u32, scope: impl Into<String>) -> Self {
        Self::DuplicateIndex {
            kind,
            index,
            scope: scope.into(),
        }
    }

    /// Creates an unsupported-construct error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedConstruct { what: what.into() }
    }
}

impl From<io::Error> for PolicyError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

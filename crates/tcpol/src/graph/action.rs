//! Action graph nodes.
//!
//! Actions form a directed graph: registered actions are addressed by a
//! per-block integer index and may be shared through `action <idx>`
//! back-references; sub-expressions of `conform`/`count` become anonymous
//! arena nodes. The graph is validated acyclic at end of parse.

use super::types::{ActionHandle, BucketHandle, ClassId};

/// One node of a block's action graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionNode {
    /// Assign the packet to a class. The grammar accepts several targets but
    /// evaluation consults only the first entry; the rest are carried as
    /// parsed (documented reference behavior, not fan-out).
    Class(Vec<ClassId>),
    /// Drop the packet.
    Drop,
    /// Leave the verdict unspecified, aborting the current policy group.
    Unspec,
    /// Police against a bucket: `yes` branch if the packet conforms,
    /// `no` branch otherwise. Never deducts tokens.
    Conform {
        /// Bucket checked for conformance.
        bucket: BucketHandle,
        /// Action on conformance.
        yes: ActionHandle,
        /// Action on excess.
        no: ActionHandle,
    },
    /// Meter against a bucket: refill, deduct the policed length, then
    /// continue unconditionally. Metering without gating.
    Count {
        /// Bucket debited.
        bucket: BucketHandle,
        /// Action evaluated next.
        next: ActionHandle,
    },
}

impl ActionNode {
    /// Returns the action handles this node links to.
    pub fn successors(&self) -> impl Iterator<Item = ActionHandle> + '_ {
        let pair: [Option<ActionHandle>; 2] = match *self {
            Self::Conform { yes, no, .. } => [Some(yes), Some(no)],
            Self::Count { next, .. } => [Some(next), None],
            Self::Class(_) | Self::Drop | Self::Unspec => [None, None],
        };
        pair.into_iter().flatten()
    }
}

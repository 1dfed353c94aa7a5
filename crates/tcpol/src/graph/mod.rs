//! Policy graph model.
//!
//! Entities are arena-allocated and addressed by small integer handles
//! resolved once at parse time; the externally visible identity of every
//! entity stays its IR index. The graph is built in one pass by
//! [`crate::parser::IrParser`] and is immutable afterwards; bucket runtime
//! token state lives in [`crate::policer::MeterState`], not here.

mod action;
mod block;
mod context;
mod types;

pub use action::ActionNode;
pub use block::{Block, Class, Match, Qdisc, Rule};
pub use context::Context;
pub use types::{
    ActionHandle, Bucket, BucketHandle, ClassHandle, ClassId, Direction, Field, GroupHandle,
    GroupRef, OffsetGroup, Param, QdiscHandle,
};

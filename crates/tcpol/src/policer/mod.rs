//! Token-bucket policing.
//!
//! Buckets are defined in the policy graph; their mutable runtime state
//! (token counts, refill stamps) lives in [`MeterState`], built per
//! evaluation stream. Refill credit beyond a bucket's depth cascades down
//! its overflow chain (the "waterfall" scheme), and the creditable idle
//! time is bounded by the whole chain's depth so idle gaps cannot build an
//! unbounded backlog.

mod meter;

pub use meter::MeterState;

//! Waterfall token-bucket runtime state.

use std::time::Duration;

use tracing::trace;

use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::graph::{BucketHandle, Context};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Runtime slot for one bucket.
#[derive(Debug, Clone, Copy)]
struct BucketSlot {
    /// Current token count in bytes.
    tokens: u64,
    /// Timestamp of the last refill; `None` until first use.
    last_refill: Option<Duration>,
    /// Resolved overflow target.
    overflow: Option<BucketHandle>,
    /// Longest idle period that may ever be credited: the summed depth of
    /// the bucket and its whole overflow chain, divided by the rate. Bounds
    /// backlog buildup across idle gaps.
    max_idle: Duration,
}

/// Mutable token state for every bucket of a context.
///
/// The parsed graph stays immutable; all policing mutations land here. One
/// meter per evaluation stream; sharing a meter across threads requires
/// external serialization (single-writer contract).
#[derive(Debug)]
pub struct MeterState {
    slots: Vec<BucketSlot>,
}

impl MeterState {
    /// Builds runtime state for `ctx`, resolving every overflow reference.
    ///
    /// A dangling overflow index surfaces here as [`PolicyError::UnknownReference`].
    pub fn new(ctx: &Context) -> PolicyResult<Self> {
        let buckets = ctx.buckets();
        let mut slots = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let overflow = match bucket.overflow {
                Some(index) => Some(ctx.find_bucket(index).ok_or_else(|| {
                    PolicyError::unknown(EntityKind::Bucket, index, bucket.location.clone())
                })?),
                None => None,
            };
            slots.push(BucketSlot {
                tokens: 0,
                last_refill: None,
                overflow,
                max_idle: Duration::ZERO,
            });
        }
        // Chain depths need every overflow handle resolved first. The walk
        // is bounded by the bucket count so a malformed cyclic chain
        // terminates instead of spinning.
        for at in 0..slots.len() {
            let mut depth_sum: u128 = 0;
            let mut cursor = Some(at);
            for _ in 0..slots.len() {
                let Some(handle) = cursor else { break };
                depth_sum += u128::from(ctx.bucket(handle).depth);
                cursor = slots[handle].overflow;
            }
            let rate = ctx.bucket(at).rate;
            slots[at].max_idle = if rate == 0 {
                // A zero-rate bucket never accrues credit; the bound is moot.
                Duration::MAX
            } else {
                let nanos = depth_sum * NANOS_PER_SEC / u128::from(rate);
                Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
            };
        }
        Ok(Self { slots })
    }

    /// Current token count, or the initial count for an untouched bucket.
    pub fn tokens(&self, ctx: &Context, handle: BucketHandle) -> u64 {
        match self.slots[handle].last_refill {
            Some(_) => self.slots[handle].tokens,
            None => ctx.bucket(handle).initial_tokens,
        }
    }

    /// Refills `handle` for the elapsed time and cascades excess credit
    /// down the overflow chain.
    pub fn refill(&mut self, ctx: &Context, handle: BucketHandle, now: Duration) {
        let Some(last) = self.slots[handle].last_refill else {
            self.init_slot(ctx, handle, now);
            return;
        };
        let elapsed = now.saturating_sub(last).min(self.slots[handle].max_idle);
        self.slots[handle].last_refill = Some(now);

        let rate = ctx.bucket(handle).rate;
        let credit = elapsed.as_nanos() * u128::from(rate) / NANOS_PER_SEC;
        let mut credit = u64::try_from(credit).unwrap_or(u64::MAX);
        if credit == 0 {
            return;
        }
        trace!(bucket = ctx.bucket(handle).index, credit, "refill");

        // Waterfall: each node absorbs up to its free depth, the remainder
        // cascades. Bounded by the bucket count, as above.
        let mut cursor = Some(handle);
        for _ in 0..self.slots.len() {
            let Some(at) = cursor else { break };
            if credit == 0 {
                break;
            }
            if self.slots[at].last_refill.is_none() {
                // Absorbing credit counts as first use, otherwise a later
                // explicit use would reset the absorbed tokens.
                self.init_slot(ctx, at, now);
            }
            let room = ctx.bucket(at).depth.saturating_sub(self.slots[at].tokens);
            let take = credit.min(room);
            self.slots[at].tokens += take;
            credit -= take;
            cursor = self.slots[at].overflow;
        }
    }

    /// Refills, then reports whether `packet_len` (floored at the bucket's
    /// minimum policed unit) conforms. Never deducts.
    pub fn conforms(
        &mut self,
        ctx: &Context,
        handle: BucketHandle,
        packet_len: u64,
        now: Duration,
    ) -> bool {
        self.refill(ctx, handle, now);
        self.slots[handle].tokens >= policed_len(ctx, handle, packet_len)
    }

    /// Refills, then deducts the policed length, saturating at zero.
    /// Metering without gating: the caller continues unconditionally.
    pub fn count(&mut self, ctx: &Context, handle: BucketHandle, packet_len: u64, now: Duration) {
        self.refill(ctx, handle, now);
        let slot = &mut self.slots[handle];
        slot.tokens = slot.tokens.saturating_sub(policed_len(ctx, handle, packet_len));
    }

    fn init_slot(&mut self, ctx: &Context, handle: BucketHandle, now: Duration) {
        self.slots[handle].tokens = ctx.bucket(handle).initial_tokens;
        self.slots[handle].last_refill = Some(now);
    }
}

fn policed_len(ctx: &Context, handle: BucketHandle, packet_len: u64) -> u64 {
    packet_len.max(ctx.bucket(handle).mpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::IrParser;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn meter(ir: &str) -> (Context, MeterState) {
        let ctx = IrParser::parse_str(ir).unwrap();
        let meter = MeterState::new(&ctx).unwrap();
        (ctx, meter)
    }

    #[test]
    fn test_first_use_grants_initial_tokens() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 64 2000 500 0\n");
        let b = ctx.find_bucket(1).unwrap();
        meter.refill(&ctx, b, secs(100));
        assert_eq!(meter.tokens(&ctx, b), 500);
    }

    #[test]
    fn test_refill_caps_at_depth() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 0 2000 0 0\n");
        let b = ctx.find_bucket(1).unwrap();
        meter.refill(&ctx, b, secs(0));
        // One second at 1000 B/s.
        meter.refill(&ctx, b, secs(1));
        assert_eq!(meter.tokens(&ctx, b), 1000);
        // An idle period beyond depth/rate refills to exactly depth.
        meter.refill(&ctx, b, secs(100));
        assert_eq!(meter.tokens(&ctx, b), 2000);
    }

    #[test]
    fn test_deduction_never_goes_negative() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 0 2000 100 0\n");
        let b = ctx.find_bucket(1).unwrap();
        meter.count(&ctx, b, 5000, secs(0));
        assert_eq!(meter.tokens(&ctx, b), 0);
    }

    #[test]
    fn test_mpu_floors_policed_length() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 64 2000 100 0\n");
        let b = ctx.find_bucket(1).unwrap();
        // A 1-byte packet is policed as 64 bytes.
        meter.count(&ctx, b, 1, secs(0));
        assert_eq!(meter.tokens(&ctx, b), 36);
        assert!(!meter.conforms(&ctx, b, 1, secs(0)));
    }

    #[test]
    fn test_overflow_cascade() {
        let (ctx, mut meter) = meter(
            "bucket 2 = 1000 0 50 0 0\n\
             bucket 1 = 1000 0 100 0 2\n",
        );
        let b1 = ctx.find_bucket(1).unwrap();
        let b2 = ctx.find_bucket(2).unwrap();
        meter.refill(&ctx, b1, secs(0));
        // 120 ms at 1000 B/s credits 120 tokens: 100 stay in bucket 1, the
        // excess 20 lands in bucket 2.
        meter.refill(&ctx, b1, Duration::from_millis(120));
        assert_eq!(meter.tokens(&ctx, b1), 100);
        assert_eq!(meter.tokens(&ctx, b2), 20);
    }

    #[test]
    fn test_chain_extends_creditable_idle_time() {
        // max_idle covers the summed chain depth: 150 bytes at 1000 B/s.
        let (ctx, mut meter) = meter(
            "bucket 2 = 1000 0 50 0 0\n\
             bucket 1 = 1000 0 100 0 2\n",
        );
        let b1 = ctx.find_bucket(1).unwrap();
        let b2 = ctx.find_bucket(2).unwrap();
        meter.refill(&ctx, b1, secs(0));
        // A very long idle gap credits at most 150 tokens, filling the
        // whole chain but no more.
        meter.refill(&ctx, b1, secs(3600));
        assert_eq!(meter.tokens(&ctx, b1), 100);
        assert_eq!(meter.tokens(&ctx, b2), 50);
    }

    #[test]
    fn test_conform_does_not_deduct() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 0 2000 500 0\n");
        let b = ctx.find_bucket(1).unwrap();
        assert!(meter.conforms(&ctx, b, 400, secs(0)));
        assert!(meter.conforms(&ctx, b, 400, secs(0)));
        assert_eq!(meter.tokens(&ctx, b), 500);
        assert!(!meter.conforms(&ctx, b, 600, secs(0)));
    }

    #[test]
    fn test_zero_rate_bucket_never_refills() {
        let (ctx, mut meter) = meter("bucket 1 = 0 0 2000 300 0\n");
        let b = ctx.find_bucket(1).unwrap();
        meter.refill(&ctx, b, secs(0));
        meter.refill(&ctx, b, secs(100000));
        assert_eq!(meter.tokens(&ctx, b), 300);
    }

    #[test]
    fn test_dangling_overflow_is_unknown_reference() {
        let ctx = IrParser::parse_str("bucket 1 = 1000 0 100 0 9\n").unwrap();
        let err = MeterState::new(&ctx).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnknownReference {
                kind: EntityKind::Bucket,
                index: 9,
                ..
            }
        ));
    }

    #[test]
    fn test_non_monotonic_clock_is_harmless() {
        let (ctx, mut meter) = meter("bucket 1 = 1000 0 2000 0 0\n");
        let b = ctx.find_bucket(1).unwrap();
        meter.refill(&ctx, b, secs(10));
        // Time going backwards credits nothing.
        meter.refill(&ctx, b, secs(5));
        assert_eq!(meter.tokens(&ctx, b), 0);
    }
}

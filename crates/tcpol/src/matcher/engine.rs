//! Rule matching and recursive action evaluation.

use std::time::Duration;

use tracing::trace;

use crate::codec::{extract_bits, resolve_offset};
use crate::error::{PolicyError, PolicyResult};
use crate::graph::{ActionHandle, ActionNode, Block, ClassId, Context, Field, GroupRef, Rule};
use crate::policer::MeterState;

/// Conventional location of the out-of-band protocol id: the only
/// supported metadata field.
const META_PROTOCOL_OFFSET: u32 = 0;
const META_PROTOCOL_BITS: u32 = 16;

/// The outcome of evaluating a packet against a block's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Enqueue into the given class.
    Classify(ClassId),
    /// Drop the packet.
    Drop,
    /// No rule produced a decision; the caller applies its default.
    Unspecified,
}

/// A packet presented for classification.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'p> {
    /// Received bytes; may be shorter than the wire length.
    pub data: &'p [u8],
    /// Length on the wire, used for policing arithmetic.
    pub wire_len: u64,
    /// Out-of-band L3 protocol identifier.
    pub protocol: u16,
}

impl<'p> Packet<'p> {
    /// Creates a packet whose wire length equals the received length.
    pub fn new(data: &'p [u8], protocol: u16) -> Self {
        Self {
            data,
            wire_len: data.len() as u64,
            protocol,
        }
    }

    /// Overrides the wire length (truncated captures).
    pub fn with_wire_len(mut self, wire_len: u64) -> Self {
        self.wire_len = wire_len;
        self
    }
}

/// Evaluates packets against a single-block policy graph.
///
/// Holds the context's bucket runtime state; all mutation during matching
/// is confined to that meter. One matcher per evaluation stream
/// (single-writer contract).
#[derive(Debug)]
pub struct Matcher<'a> {
    ctx: &'a Context,
    block: &'a Block,
    meter: MeterState,
}

impl<'a> Matcher<'a> {
    /// Creates a matcher for a context holding exactly one block.
    ///
    /// Multi-block contexts are unsupported and fail with
    /// [`PolicyError::UnsupportedConstruct`].
    pub fn new(ctx: &'a Context) -> PolicyResult<Self> {
        let [block] = ctx.blocks() else {
            return Err(PolicyError::unsupported(format!(
                "matching needs exactly one block, context has {}",
                ctx.blocks().len()
            )));
        };
        Ok(Self {
            ctx,
            block,
            meter: MeterState::new(ctx)?,
        })
    }

    /// The bucket meter, for callers inspecting token state.
    pub fn meter(&self) -> &MeterState {
        &self.meter
    }

    /// Evaluates one packet and returns the verdict.
    ///
    /// Rules run in definition order. Barriers separate policy groups: an
    /// action evaluating to [`Verdict::Unspecified`] abandons the current
    /// group (skipping forward past the next barrier) instead of ending the
    /// whole evaluation.
    pub fn match_packet(&mut self, packet: &Packet<'_>, now: Duration) -> PolicyResult<Verdict> {
        let block = self.block;
        let mut skipping_group = false;
        for rule in &block.rules {
            if rule.is_barrier() {
                skipping_group = false;
                continue;
            }
            if skipping_group {
                continue;
            }
            if !self.rule_matches(rule, packet)? {
                continue;
            }
            let Some(action) = rule.action else { continue };
            match self.eval_action(action, packet.wire_len, now)? {
                Verdict::Unspecified => {
                    trace!("unspecified verdict, skipping to next barrier");
                    skipping_group = true;
                }
                verdict => return Ok(verdict),
            }
        }
        Ok(Verdict::Unspecified)
    }

    fn rule_matches(&self, rule: &Rule, packet: &Packet<'_>) -> PolicyResult<bool> {
        for m in &rule.matches {
            match self.field_value(&m.field, packet)? {
                Some(value) if value == m.value => {}
                // A mismatch or an absent field both fail the rule.
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Extracts a field from the packet, or `None` if the packet is too
    /// short to carry it.
    fn field_value(&self, field: &Field, packet: &Packet<'_>) -> PolicyResult<Option<u32>> {
        match field.group {
            GroupRef::Meta => {
                if field.offset != META_PROTOCOL_OFFSET || field.length != META_PROTOCOL_BITS {
                    return Err(PolicyError::unsupported(format!(
                        "meta field {}:{} (only the protocol id at {}:{} is supported)",
                        field.offset, field.length, META_PROTOCOL_OFFSET, META_PROTOCOL_BITS
                    )));
                }
                Ok(Some(u32::from(packet.protocol)))
            }
            group => {
                let Some(base) = resolve_offset(self.ctx, group, packet.data)? else {
                    return Ok(None);
                };
                extract_bits(packet.data, base + u64::from(field.offset), field.length)
            }
        }
    }

    fn eval_action(
        &mut self,
        handle: ActionHandle,
        wire_len: u64,
        now: Duration,
    ) -> PolicyResult<Verdict> {
        // The block reference outlives &mut self, so the recursion below
        // can borrow the meter while walking nodes.
        let block = self.block;
        match block.action(handle) {
            ActionNode::Class(entries) => {
                // Only the first entry is consulted, even though the
                // grammar accepts several.
                let id = entries.first().copied().ok_or_else(|| {
                    PolicyError::unsupported("class action with no targets".to_string())
                })?;
                Ok(Verdict::Classify(id))
            }
            ActionNode::Drop => Ok(Verdict::Drop),
            ActionNode::Unspec => Ok(Verdict::Unspecified),
            &ActionNode::Conform { bucket, yes, no } => {
                let branch = if self.meter.conforms(self.ctx, bucket, wire_len, now) {
                    yes
                } else {
                    no
                };
                self.eval_action(branch, wire_len, now)
            }
            &ActionNode::Count { bucket, next } => {
                self.meter.count(self.ctx, bucket, wire_len, now);
                self.eval_action(next, wire_len, now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::IrParser;

    const ETH_IP: u16 = 0x0800;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_single_block_required() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = fifo\n\
             block eth1 egress\n\
             qdisc 1 = fifo\n",
        )
        .unwrap();
        let err = Matcher::new(&ctx).unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedConstruct { .. }));

        let empty = IrParser::parse_str("").unwrap();
        assert!(Matcher::new(&empty).is_err());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = prio\n\
             class 1 =\n\
             class 2 =\n\
             action 0 = class 1:1\n\
             action 1 = class 1:2\n\
             match 0:0:8=0x45 action 0\n\
             match 0:0:4=0x4 action 1\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();

        // First byte 0x45 satisfies both rules; the first one decides.
        let verdict = matcher
            .match_packet(&Packet::new(&[0x45, 0x00], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Classify(ClassId::new(1, 1)));

        // 0x46 only satisfies the 4-bit version match.
        let verdict = matcher
            .match_packet(&Packet::new(&[0x46, 0x00], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Classify(ClassId::new(1, 2)));

        // Nothing matches.
        let verdict = matcher
            .match_packet(&Packet::new(&[0x60, 0x00], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Unspecified);
    }

    #[test]
    fn test_all_matches_must_hold() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = fifo\n\
             action 0 = drop\n\
             match 0:0:8=0x45 0:8:8=0x11 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();

        let verdict = matcher
            .match_packet(&Packet::new(&[0x45, 0x11], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Drop);

        let verdict = matcher
            .match_packet(&Packet::new(&[0x45, 0x06], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Unspecified);
    }

    #[test]
    fn test_meta_protocol_match() {
        let ctx = IrParser::parse_str(
            "block eth0 ingress\n\
             qdisc 1 = fifo\n\
             action 0 = drop\n\
             match meta:0:16=0x806 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();

        let arp = Packet::new(&[0u8; 4], 0x0806);
        assert_eq!(matcher.match_packet(&arp, secs(0)).unwrap(), Verdict::Drop);

        let ip = Packet::new(&[0u8; 4], ETH_IP);
        assert_eq!(
            matcher.match_packet(&ip, secs(0)).unwrap(),
            Verdict::Unspecified
        );
    }

    #[test]
    fn test_non_protocol_meta_field_is_fatal() {
        let ctx = IrParser::parse_str(
            "block eth0 ingress\n\
             qdisc 1 = fifo\n\
             action 0 = drop\n\
             match meta:16:8=0x1 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        let err = matcher
            .match_packet(&Packet::new(&[0u8; 4], ETH_IP), secs(0))
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_short_packet_fails_match_not_evaluation() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = fifo\n\
             action 0 = drop\n\
             match 0:72:8=0x6 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        // The field lives at byte 9; a 4-byte packet simply does not match.
        let verdict = matcher
            .match_packet(&Packet::new(&[0u8; 4], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Unspecified);
    }

    #[test]
    fn test_conform_gates_on_tokens() {
        let ctx = IrParser::parse_str(
            "bucket 1 = 1000 0 2000 1000 0\n\
             block eth0 egress\n\
             qdisc 1 = fifo\n\
             class 1 =\n\
             action 0 = conform 1 count 1 class 1:1 drop\n\
             match 0:0:8=0x45 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        let packet = Packet::new(&[0x45u8; 600], ETH_IP);

        // 1000 initial tokens admit one 600-byte packet, which the nested
        // count action then debits.
        assert_eq!(
            matcher.match_packet(&packet, secs(0)).unwrap(),
            Verdict::Classify(ClassId::new(1, 1))
        );
        // 400 tokens left: the second packet takes the no-branch.
        assert_eq!(
            matcher.match_packet(&packet, secs(0)).unwrap(),
            Verdict::Drop
        );
        // After 200 ms at 1000 B/s the bucket is back above 600.
        assert_eq!(
            matcher
                .match_packet(&packet, Duration::from_millis(200))
                .unwrap(),
            Verdict::Classify(ClassId::new(1, 1))
        );
    }

    #[test]
    fn test_policing_uses_wire_length() {
        let ctx = IrParser::parse_str(
            "bucket 1 = 1000 0 2000 1000 0\n\
             block eth0 egress\n\
             qdisc 1 = fifo\n\
             class 1 =\n\
             action 0 = conform 1 class 1:1 drop\n\
             match 0:0:8=0x45 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        // A 4-byte truncated capture of a 1500-byte packet exceeds the
        // 1000 available tokens.
        let packet = Packet::new(&[0x45, 0, 0, 0], ETH_IP).with_wire_len(1500);
        assert_eq!(
            matcher.match_packet(&packet, secs(0)).unwrap(),
            Verdict::Drop
        );
    }

    #[test]
    fn test_unspecified_skips_to_next_barrier() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = fifo\n\
             class 1 =\n\
             class 2 =\n\
             action 0 = unspec\n\
             action 1 = class 1:1\n\
             action 2 = class 1:2\n\
             match 0:0:8=0x45 action 0\n\
             match 0:0:8=0x45 action 1\n\
             barrier\n\
             match 0:0:8=0x45 action 2\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        // The unspec action abandons the first policy group: the second
        // rule is skipped even though it would match, and evaluation
        // resumes after the barrier.
        let verdict = matcher
            .match_packet(&Packet::new(&[0x45], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Classify(ClassId::new(1, 2)));
    }

    #[test]
    fn test_unspecified_with_no_later_barrier_ends_evaluation() {
        let ctx = IrParser::parse_str(
            "block eth0 egress\n\
             qdisc 1 = fifo\n\
             class 1 =\n\
             action 0 = unspec\n\
             action 1 = class 1:1\n\
             match 0:0:8=0x45 action 0\n\
             match 0:0:8=0x45 action 1\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        let verdict = matcher
            .match_packet(&Packet::new(&[0x45], ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Unspecified);
    }

    #[test]
    fn test_offset_group_locates_dynamic_field() {
        // Group 1 derives the header length from the low nibble of byte 0
        // (IPv4-style IHL in 32-bit words); the match then tests the first
        // payload byte.
        let ctx = IrParser::parse_str(
            "offset 1 = 0+(0:4:4) << 5\n\
             block eth0 egress\n\
             qdisc 1 = fifo\n\
             action 0 = drop\n\
             match 1:0:8=0xab action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();

        // IHL = 5 -> payload at bit 160 (byte 20).
        let mut packet = [0u8; 24];
        packet[0] = 0x45;
        packet[20] = 0xab;
        let verdict = matcher
            .match_packet(&Packet::new(&packet, ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Drop);

        // IHL = 6 -> payload moves to byte 24; the same packet no longer
        // matches.
        packet[0] = 0x46;
        let verdict = matcher
            .match_packet(&Packet::new(&packet, ETH_IP), secs(0))
            .unwrap();
        assert_eq!(verdict, Verdict::Unspecified);
    }

    #[test]
    fn test_nested_policing_is_depth_first() {
        // Outer conform gates on bucket 1, inner on bucket 2; the counts
        // debit in declaration order.
        let ctx = IrParser::parse_str(
            "bucket 1 = 1000 0 1000 1000 0\n\
             bucket 2 = 1000 0 500 500 0\n\
             block eth0 egress\n\
             qdisc 1 = fifo\n\
             class 1 =\n\
             action 0 = conform 1 conform 2 count 1 count 2 class 1:1 drop unspec\n\
             match 0:0:8=0x45 action 0\n",
        )
        .unwrap();
        let mut matcher = Matcher::new(&ctx).unwrap();
        let packet = Packet::new(&[0x45u8; 300], ETH_IP);

        // Both buckets conform: classify, debiting 300 from each.
        assert_eq!(
            matcher.match_packet(&packet, secs(0)).unwrap(),
            Verdict::Classify(ClassId::new(1, 1))
        );
        // Bucket 2 is down to 200 < 300: inner no-branch drops.
        assert_eq!(
            matcher.match_packet(&packet, secs(0)).unwrap(),
            Verdict::Drop
        );
    }
}

//! Top-level parse result and cross-block validation.

use std::collections::BTreeMap;

use crate::error::{PolicyError, PolicyResult};
use crate::ext::Extensions;

use super::block::Block;
use super::types::{Bucket, BucketHandle, GroupHandle, OffsetGroup};

/// The fully built policy graph: global pragmas, the shared bucket and
/// offset-group sets, and the block list. Immutable after parsing; bucket
/// runtime token state lives in [`crate::policer::MeterState`]. Dropping
/// the context releases every parser-owned node and string, including any
/// caller extension payloads still attached.
#[derive(Debug, Default)]
pub struct Context {
    /// Global pragma words.
    pub pragmas: Vec<String>,
    buckets: Vec<Bucket>,
    bucket_index: BTreeMap<u32, BucketHandle>,
    offset_groups: Vec<OffsetGroup>,
    group_index: BTreeMap<u32, GroupHandle>,
    blocks: Vec<Block>,
    /// Caller-owned extension data; never touched by the core.
    pub ext: Extensions,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The shared bucket set.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// The bucket stored at `handle`.
    pub fn bucket(&self, handle: BucketHandle) -> &Bucket {
        &self.buckets[handle]
    }

    /// Resolves a bucket IR index.
    pub fn find_bucket(&self, index: u32) -> Option<BucketHandle> {
        self.bucket_index.get(&index).copied()
    }

    pub(crate) fn push_bucket(&mut self, bucket: Bucket) -> BucketHandle {
        let handle = self.buckets.len();
        self.bucket_index.insert(bucket.index, handle);
        self.buckets.push(bucket);
        handle
    }

    /// The shared offset-group set.
    pub fn offset_groups(&self) -> &[OffsetGroup] {
        &self.offset_groups
    }

    /// The offset group stored at `handle`.
    pub fn offset_group(&self, handle: GroupHandle) -> &OffsetGroup {
        &self.offset_groups[handle]
    }

    /// Resolves an offset-group IR index.
    pub fn find_offset_group(&self, index: u32) -> Option<GroupHandle> {
        self.group_index.get(&index).copied()
    }

    pub(crate) fn push_offset_group(&mut self, group: OffsetGroup) -> GroupHandle {
        let handle = self.offset_groups.len();
        self.group_index.insert(group.index, handle);
        self.offset_groups.push(group);
        handle
    }

    /// The block list, in definition order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Finds a block by `(name, direction)` spelled as in its location.
    pub fn find_block(&self, name: &str, direction: crate::graph::Direction) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.name == name && b.direction == direction)
    }

    pub(crate) fn push_block(&mut self, block: Block) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> &mut Block {
        &mut self.blocks[index]
    }

    /// Validates that no block's action graph contains a reference cycle.
    ///
    /// Back-references can only name already-registered actions, so a cycle
    /// cannot form through the documented grammar; this check makes the
    /// invariant structural rather than assumed.
    pub(crate) fn validate_action_graphs(&self) -> PolicyResult<()> {
        for block in &self.blocks {
            for (index, entry) in block.action_indices() {
                check_acyclic_from(block, entry).map_err(|_| PolicyError::CyclicActionGraph {
                    block: block.location.clone(),
                    index,
                })?;
            }
        }
        Ok(())
    }
}

/// Iterative DFS cycle check over the action graph reachable from `entry`.
fn check_acyclic_from(block: &Block, entry: usize) -> Result<(), ()> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut color = vec![WHITE; block.actions().len()];
    // Stack entries: (handle, entered). A node is pushed once to enter
    // (mark gray, push successors) and once more to leave (mark black).
    let mut stack = vec![(entry, false)];
    while let Some((handle, entered)) = stack.pop() {
        if entered {
            color[handle] = BLACK;
            continue;
        }
        match color[handle] {
            GRAY => return Err(()),
            BLACK => continue,
            _ => {}
        }
        color[handle] = GRAY;
        stack.push((handle, true));
        for succ in block.action(handle).successors() {
            match color[succ] {
                GRAY => return Err(()),
                BLACK => {}
                _ => stack.push((succ, false)),
            }
        }
    }
    Ok(())
}

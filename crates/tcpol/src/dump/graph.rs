//! Full policy graph dump.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::graph::{ActionHandle, ActionNode, Block, Context, Field, GroupRef, Qdisc};

/// Writes a deterministic, human-readable rendering of the whole graph.
pub fn write_context<W: Write>(ctx: &Context, out: &mut W) -> fmt::Result {
    if !ctx.pragmas.is_empty() {
        writeln!(out, "pragma {}", ctx.pragmas.join(" "))?;
    }
    for bucket in ctx.buckets() {
        let overflow = match bucket.overflow {
            Some(index) => index.to_string(),
            None => "-".to_string(),
        };
        writeln!(
            out,
            "bucket {} = rate {} mpu {} depth {} initial {} overflow {}",
            bucket.index, bucket.rate, bucket.mpu, bucket.depth, bucket.initial_tokens, overflow
        )?;
    }
    for group in ctx.offset_groups() {
        writeln!(
            out,
            "offset {} = {}+({}) << {}",
            group.index,
            group_ref_str(ctx, group.base),
            field_str(ctx, &group.field),
            group.shift
        )?;
    }
    for block in ctx.blocks() {
        write_block(ctx, block, out)?;
    }
    Ok(())
}

/// Renders the whole graph to a string.
pub fn context_to_string(ctx: &Context) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_context(ctx, &mut out);
    out
}

fn write_block<W: Write>(ctx: &Context, block: &Block, out: &mut W) -> fmt::Result {
    write!(out, "block {} {}", block.name, block.direction)?;
    write_pragmas(&block.pragmas, out)?;
    writeln!(out)?;

    for qdisc in block.qdiscs() {
        write_qdisc(qdisc, out)?;
    }

    // Registered indices addressing the same node render as back-references
    // after their first occurrence, mirroring the sharing in the graph.
    let mut seen: BTreeMap<ActionHandle, u32> = BTreeMap::new();
    for (index, handle) in block.action_indices() {
        write!(out, "  action {} = ", index)?;
        match seen.get(&handle) {
            Some(first) => write!(out, "action {}", first)?,
            None => {
                seen.insert(handle, index);
                write_action(block, handle, &seen, ctx, out)?;
            }
        }
        writeln!(out)?;
    }

    for rule in &block.rules {
        if rule.is_barrier() {
            writeln!(out, "  barrier")?;
            continue;
        }
        write!(out, "  match")?;
        for m in &rule.matches {
            write!(out, " {}={:#x}", field_str(ctx, &m.field), m.value)?;
        }
        if let Some(action) = rule.action {
            match reverse_lookup(block, action) {
                Some(index) => write!(out, " action {}", index)?,
                None => write!(out, " action ?")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_qdisc<W: Write>(qdisc: &Qdisc, out: &mut W) -> fmt::Result {
    write!(
        out,
        "  qdisc {} = {}",
        qdisc.index,
        qdisc.kind.as_deref().unwrap_or("<placeholder>")
    )?;
    write_params(qdisc, out)?;
    write_pragmas(&qdisc.pragmas, out)?;
    writeln!(out)?;
    for &root in qdisc.roots() {
        write_class(qdisc, root, 2, out)?;
    }
    Ok(())
}

fn write_class<W: Write>(
    qdisc: &Qdisc,
    handle: usize,
    depth: usize,
    out: &mut W,
) -> fmt::Result {
    let class = qdisc.class(handle);
    write!(out, "{:indent$}class {} =", "", class.index, indent = depth * 2)?;
    for param in &class.params {
        write!(out, " {} {}", param.name, param.value)?;
    }
    if let Some(child) = class.child_qdisc {
        write!(out, " qdisc {}", child)?;
    }
    write_pragmas(&class.pragmas, out)?;
    writeln!(out)?;
    for &child in class.children() {
        write_class(qdisc, child, depth + 1, out)?;
    }
    Ok(())
}

fn write_action<W: Write>(
    block: &Block,
    handle: ActionHandle,
    seen: &BTreeMap<ActionHandle, u32>,
    ctx: &Context,
    out: &mut W,
) -> fmt::Result {
    match block.action(handle) {
        ActionNode::Drop => write!(out, "drop"),
        ActionNode::Unspec => write!(out, "unspec"),
        ActionNode::Class(entries) => {
            write!(out, "class ")?;
            for (at, entry) in entries.iter().enumerate() {
                if at > 0 {
                    write!(out, ",")?;
                }
                write!(out, "{}", entry)?;
            }
            Ok(())
        }
        &ActionNode::Conform { bucket, yes, no } => {
            write!(out, "conform {} ", ctx.bucket(bucket).index)?;
            write_sub_action(block, yes, seen, ctx, out)?;
            write!(out, " ")?;
            write_sub_action(block, no, seen, ctx, out)
        }
        &ActionNode::Count { bucket, next } => {
            write!(out, "count {} ", ctx.bucket(bucket).index)?;
            write_sub_action(block, next, seen, ctx, out)
        }
    }
}

fn write_sub_action<W: Write>(
    block: &Block,
    handle: ActionHandle,
    seen: &BTreeMap<ActionHandle, u32>,
    ctx: &Context,
    out: &mut W,
) -> fmt::Result {
    match seen.get(&handle) {
        Some(index) => write!(out, "action {}", index),
        None => write_action(block, handle, seen, ctx, out),
    }
}

fn write_params<W: Write>(qdisc: &Qdisc, out: &mut W) -> fmt::Result {
    for param in &qdisc.params {
        write!(out, " {} {}", param.name, param.value)?;
    }
    Ok(())
}

fn write_pragmas<W: Write>(pragmas: &[String], out: &mut W) -> fmt::Result {
    if !pragmas.is_empty() {
        write!(out, " pragma {}", pragmas.join(" "))?;
    }
    Ok(())
}

fn reverse_lookup(block: &Block, handle: ActionHandle) -> Option<u32> {
    block
        .action_indices()
        .find(|&(_, h)| h == handle)
        .map(|(index, _)| index)
}

pub(crate) fn group_ref_str(ctx: &Context, group: GroupRef) -> String {
    match group {
        GroupRef::Absolute => "0".to_string(),
        GroupRef::Meta => "meta".to_string(),
        GroupRef::Group(handle) => ctx.offset_group(handle).index.to_string(),
    }
}

pub(crate) fn field_str(ctx: &Context, field: &Field) -> String {
    format!(
        "{}:{}:{}",
        group_ref_str(ctx, field.group),
        field.offset,
        field.length
    )
}

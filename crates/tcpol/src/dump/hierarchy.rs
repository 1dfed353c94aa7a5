//! Simplified qdisc/class hierarchy view.

use std::fmt::{self, Write};

use crate::graph::{Block, Context, Qdisc};

/// Writes a condensed tree of each block's qdiscs and classes, following
/// class-to-qdisc hand-offs with an arrow instead of re-printing the
/// target tree.
pub fn write_hierarchy<W: Write>(ctx: &Context, out: &mut W) -> fmt::Result {
    for block in ctx.blocks() {
        writeln!(out, "block {}", block.location)?;
        for qdisc in block.qdiscs() {
            write_qdisc(block, qdisc, out)?;
        }
    }
    Ok(())
}

/// Renders the hierarchy to a string.
pub fn hierarchy_to_string(ctx: &Context) -> String {
    let mut out = String::new();
    let _ = write_hierarchy(ctx, &mut out);
    out
}

fn write_qdisc<W: Write>(block: &Block, qdisc: &Qdisc, out: &mut W) -> fmt::Result {
    match qdisc.kind.as_deref() {
        Some(kind) => writeln!(out, "  qdisc {} ({})", qdisc.index, kind)?,
        None => writeln!(out, "  qdisc {} (placeholder)", qdisc.index)?,
    }
    for &root in qdisc.roots() {
        write_class(block, qdisc, root, 2, out)?;
    }
    Ok(())
}

fn write_class<W: Write>(
    block: &Block,
    qdisc: &Qdisc,
    handle: usize,
    depth: usize,
    out: &mut W,
) -> fmt::Result {
    let class = qdisc.class(handle);
    write!(out, "{:indent$}class {}", "", class.index, indent = depth * 2)?;
    if let Some(child) = class.child_qdisc {
        write!(out, " -> qdisc {}", child)?;
        if block.find_qdisc(child).is_none() {
            write!(out, " (missing)")?;
        }
    }
    writeln!(out)?;
    for &child in class.children() {
        write_class(block, qdisc, child, depth + 1, out)?;
    }
    Ok(())
}

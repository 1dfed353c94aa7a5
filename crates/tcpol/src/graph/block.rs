//! Per-direction policy scope: blocks, qdiscs, class trees and rules.

use std::collections::BTreeMap;

use crate::ext::Extensions;

use super::action::ActionNode;
use super::types::{ActionHandle, ClassHandle, ClassId, Direction, Field, Param, QdiscHandle};

/// A match condition: a field compared for equality against a
/// right-aligned literal bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// The field to extract.
    pub field: Field,
    /// Right-aligned literal the extracted bits must equal.
    pub value: u32,
}

/// A classification rule: all matches must hold (AND), then the action is
/// evaluated. A rule with no action is a barrier, a policy-group separator
/// with no direct matching effect at runtime.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Match conditions, all of which must hold.
    pub matches: Vec<Match>,
    /// Action evaluated on a full match; `None` marks a barrier.
    pub action: Option<ActionHandle>,
}

impl Rule {
    /// Returns true if this rule is a barrier.
    pub fn is_barrier(&self) -> bool {
        self.action.is_none()
    }
}

/// A traffic class under a qdisc.
#[derive(Debug)]
pub struct Class {
    /// IR index, unique within the enclosing qdisc's whole tree.
    pub index: u32,
    /// Free-form numeric parameters.
    pub params: Vec<Param>,
    /// Pragma words attached to the class.
    pub pragmas: Vec<String>,
    /// Index of the child qdisc traffic is handed off to, if any.
    pub child_qdisc: Option<u32>,
    /// Nested child classes.
    children: Vec<ClassHandle>,
    /// Diagnostic provenance string.
    pub location: String,
    /// Caller-owned extension data; never touched by the core.
    pub ext: Extensions,
}

impl Class {
    pub(crate) fn new(index: u32, location: String) -> Self {
        Self {
            index,
            params: Vec::new(),
            pragmas: Vec::new(),
            child_qdisc: None,
            children: Vec::new(),
            location,
            ext: Extensions::new(),
        }
    }

    /// Handles of the nested child classes.
    pub fn children(&self) -> &[ClassHandle] {
        &self.children
    }
}

/// A queueing discipline node.
#[derive(Debug)]
pub struct Qdisc {
    /// IR index, unique within the block.
    pub index: u32,
    /// Type name; `None` marks a placeholder synthesized by
    /// forward-reference resolution.
    pub kind: Option<String>,
    /// Free-form numeric parameters.
    pub params: Vec<Param>,
    /// Pragma words attached to the qdisc.
    pub pragmas: Vec<String>,
    /// Class arena; tree structure is expressed through root/child handles.
    classes: Vec<Class>,
    /// Handles of the top-level classes.
    roots: Vec<ClassHandle>,
    /// Diagnostic provenance string.
    pub location: String,
    /// Caller-owned extension data; never touched by the core.
    pub ext: Extensions,
}

impl Qdisc {
    pub(crate) fn new(index: u32, kind: Option<String>, location: String) -> Self {
        Self {
            index,
            kind,
            params: Vec::new(),
            pragmas: Vec::new(),
            classes: Vec::new(),
            roots: Vec::new(),
            location,
            ext: Extensions::new(),
        }
    }

    /// Returns true if this qdisc is a fudged placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.kind.is_none()
    }

    /// The class stored at `handle`.
    pub fn class(&self, handle: ClassHandle) -> &Class {
        &self.classes[handle]
    }

    pub(crate) fn class_mut(&mut self, handle: ClassHandle) -> &mut Class {
        &mut self.classes[handle]
    }

    /// Handles of the top-level classes.
    pub fn roots(&self) -> &[ClassHandle] {
        &self.roots
    }

    /// Number of classes in the tree.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Finds a class by index, searching the tree recursively through
    /// nested children.
    pub fn find_class(&self, index: u32) -> Option<ClassHandle> {
        let mut stack: Vec<ClassHandle> = self.roots.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            let class = &self.classes[handle];
            if class.index == index {
                return Some(handle);
            }
            stack.extend(class.children.iter().rev().copied());
        }
        None
    }

    /// Adds a class under `parent` (or as a tree root) and returns its
    /// handle. Index uniqueness is the parser's responsibility.
    pub(crate) fn push_class(&mut self, class: Class, parent: Option<ClassHandle>) -> ClassHandle {
        let handle = self.classes.len();
        self.classes.push(class);
        match parent {
            Some(parent) => self.classes[parent].children.push(handle),
            None => self.roots.push(handle),
        }
        handle
    }
}

/// The policy scope for one interface direction.
#[derive(Debug)]
pub struct Block {
    /// Interface name.
    pub name: String,
    /// Traffic direction.
    pub direction: Direction,
    /// Ordered qdisc list; the first entry is the top-level qdisc.
    qdiscs: Vec<Qdisc>,
    /// Action arena.
    actions: Vec<ActionNode>,
    /// Registered action indices.
    action_index: BTreeMap<u32, ActionHandle>,
    /// Classification rules in definition order.
    pub rules: Vec<Rule>,
    /// Pragma words attached to the block.
    pub pragmas: Vec<String>,
    /// Diagnostic provenance string.
    pub location: String,
    /// Caller-owned extension data; never touched by the core.
    pub ext: Extensions,
}

impl Block {
    pub(crate) fn new(name: String, direction: Direction) -> Self {
        let location = format!("{}/{}", name, direction);
        Self {
            name,
            direction,
            qdiscs: Vec::new(),
            actions: Vec::new(),
            action_index: BTreeMap::new(),
            rules: Vec::new(),
            pragmas: Vec::new(),
            location,
            ext: Extensions::new(),
        }
    }

    /// The qdiscs owned by this block, first entry top-level.
    pub fn qdiscs(&self) -> &[Qdisc] {
        &self.qdiscs
    }

    /// The qdisc stored at `handle`.
    pub fn qdisc(&self, handle: QdiscHandle) -> &Qdisc {
        &self.qdiscs[handle]
    }

    pub(crate) fn qdisc_mut(&mut self, handle: QdiscHandle) -> &mut Qdisc {
        &mut self.qdiscs[handle]
    }

    /// Finds a qdisc by index within this block.
    pub fn find_qdisc(&self, index: u32) -> Option<QdiscHandle> {
        self.qdiscs.iter().position(|q| q.index == index)
    }

    pub(crate) fn push_qdisc(&mut self, qdisc: Qdisc) -> QdiscHandle {
        self.qdiscs.push(qdisc);
        self.qdiscs.len() - 1
    }

    /// The action arena.
    pub fn actions(&self) -> &[ActionNode] {
        &self.actions
    }

    /// The action node stored at `handle`.
    pub fn action(&self, handle: ActionHandle) -> &ActionNode {
        &self.actions[handle]
    }

    /// Registered action indices and their handles, in index order.
    pub fn action_indices(&self) -> impl Iterator<Item = (u32, ActionHandle)> + '_ {
        self.action_index.iter().map(|(&idx, &handle)| (idx, handle))
    }

    /// Resolves a registered action index.
    pub fn find_action(&self, index: u32) -> Option<ActionHandle> {
        self.action_index.get(&index).copied()
    }

    pub(crate) fn push_action(&mut self, node: ActionNode) -> ActionHandle {
        self.actions.push(node);
        self.actions.len() - 1
    }

    pub(crate) fn register_action(&mut self, index: u32, handle: ActionHandle) {
        self.action_index.insert(index, handle);
    }

    /// Resolves the class identity `(qdisc, class)` to the class node, if
    /// both are defined (fudged placeholders count as defined).
    pub fn find_class(&self, id: ClassId) -> Option<&Class> {
        let qdisc = &self.qdiscs[self.find_qdisc(id.qdisc)?];
        Some(qdisc.class(qdisc.find_class(id.class)?))
    }
}

//! Arena representation of a task hierarchy snapshot and its flattening.
//!
//! A snapshot arrives as one nested [`TaskRecord`]. It is moved into an
//! arena keyed by [`TaskId`]: every node keeps its record (with `children`
//! detached), the id of its parent and the ids of its children sorted
//! ascending. Parent lookups go through the arena, so no node ever holds a
//! reference back to its owner.

use crate::{DomainError, DomainResult, TaskId, TaskRecord};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// One arena slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    /// The record as reported, with `children` emptied.
    pub record: TaskRecord,
    /// Parent computed from the nesting, not from `record.parent_id`.
    pub parent: Option<TaskId>,
    /// Child ids sorted ascending.
    pub children: Vec<TaskId>,
    /// Depth from the root, computed from the nesting.
    pub depth: u32,
}

/// One row of the flattened hierarchy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatEntry<'a> {
    pub record: &'a TaskRecord,
    /// Traversal depth; the root is 0.
    pub display_level: u32,
    pub parent_id: Option<TaskId>,
    /// The parent job is currently blocked on this task.
    pub blocking: bool,
    pub child_count: usize,
}

impl FlatEntry<'_> {
    pub fn id(&self) -> TaskId {
        self.record.id
    }
}

/// Immutable arena built from one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskTree {
    root: Option<TaskId>,
    nodes: HashMap<TaskId, TaskNode>,
}

impl TaskTree {
    /// A tree with no tasks, used before the first snapshot arrives.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the arena from the root of a snapshot.
    ///
    /// Siblings sharing an id are collapsed: the first one in ascending id
    /// order (stable with respect to the snapshot) wins and the rest of that
    /// subtree is dropped with a warning.
    pub fn from_root(root: TaskRecord) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        let mut seen = HashSet::from([root_id]);
        let mut stack = vec![(root, None, 0u32)];

        while let Some((mut record, parent, depth)) = stack.pop() {
            let mut children = std::mem::take(&mut record.children);
            children.sort_by_key(|child| child.id);

            let mut child_ids = Vec::with_capacity(children.len());
            for child in children {
                if seen.insert(child.id) {
                    child_ids.push(child.id);
                    stack.push((child, Some(record.id), depth.saturating_add(1)));
                } else {
                    warn!(task_id = %child.id, parent_id = %record.id, "Duplicate task id in snapshot, dropping");
                }
            }

            nodes.insert(
                record.id,
                TaskNode {
                    record,
                    parent,
                    children: child_ids,
                    depth,
                },
            );
        }

        Self {
            root: Some(root_id),
            nodes,
        }
    }

    /// Builds the arena from an optional root; `None` yields an empty tree.
    pub fn from_optional_root(root: Option<TaskRecord>) -> Self {
        root.map_or_else(Self::empty, Self::from_root)
    }

    pub fn root(&self) -> Option<&TaskRecord> {
        self.root.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.nodes.get(&id).map(|node| &node.record)
    }

    /// Like [`get`](Self::get), for callers that treat absence as an error.
    pub fn require(&self, id: TaskId) -> DomainResult<&TaskRecord> {
        self.get(id)
            .ok_or(DomainError::TaskNotFound { task_id: id })
    }

    pub fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Looks up the owner of `id` through the arena index.
    pub fn parent(&self, id: TaskId) -> Option<&TaskRecord> {
        self.nodes
            .get(&id)
            .and_then(|node| node.parent)
            .and_then(|parent| self.get(parent))
    }

    /// Children of `id` in ascending id order.
    pub fn children(&self, id: TaskId) -> Vec<&TaskRecord> {
        self.nodes
            .get(&id)
            .map(|node| node.children.iter().filter_map(|c| self.get(*c)).collect())
            .unwrap_or_default()
    }

    /// Path from `id` up to the root, excluding `id` itself.
    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(parent) = current {
            path.push(parent);
            current = self.nodes.get(&parent).and_then(|node| node.parent);
        }
        path
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order linearization with siblings in ascending id order.
    ///
    /// The result depends only on the set of (parent, child) relations in
    /// the snapshot, never on the order children were listed in.
    pub fn flatten(&self) -> Vec<FlatEntry<'_>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root else {
            return out;
        };

        let mut stack = vec![(root, 0u32)];
        while let Some((id, level)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };

            let blocking = node
                .parent
                .and_then(|parent| self.get(parent))
                .and_then(|parent| parent.blocked.as_ref())
                .is_some_and(|blocked| blocked.id == id);

            out.push(FlatEntry {
                record: &node.record,
                display_level: level,
                parent_id: node.parent,
                blocking,
                child_count: node.children.len(),
            });

            for child in node.children.iter().rev() {
                stack.push((*child, level.saturating_add(1)));
            }
        }
        out
    }

    /// Number of tasks per state, for status bars and summaries.
    pub fn state_counts(&self) -> Vec<(crate::TaskState, usize)> {
        let mut counts: Vec<(crate::TaskState, usize)> = Vec::new();
        for node in self.nodes.values() {
            match counts.iter_mut().find(|(state, _)| *state == node.record.state) {
                Some((_, count)) => *count += 1,
                None => counts.push((node.record.state, 1)),
            }
        }
        counts.sort_by_key(|(state, _)| state.code());
        counts
    }
}

/// Flattens a snapshot root into `(id, display_level)` pairs in display
/// order, for callers that do not need the arena afterwards.
pub fn flatten(root: TaskRecord) -> Vec<(TaskId, u32)> {
    TaskTree::from_root(root)
        .flatten()
        .iter()
        .map(|entry| (entry.id(), entry.display_level))
        .collect()
}

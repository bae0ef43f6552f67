//! Per-job progress and diagnostics tree.
//!
//! Nodes live in an arena behind one `parking_lot::Mutex`; handles are cheap
//! clones holding an index, so concurrent item tasks each get their own child
//! without sharing mutable references. The tree is observational only: a
//! poller takes [`ProgressTree::snapshot`] and renders it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    /// Finished, with a short outcome such as "updated"
    Done(String),
    Failed(String),
}

/// Owned copy of one node and its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressNode {
    pub label: String,
    pub status: NodeStatus,
    pub children: Vec<ProgressNode>,
}

impl ProgressNode {
    /// Whether this node or any descendant failed.
    pub fn has_failures(&self) -> bool {
        matches!(self.status, NodeStatus::Failed(_))
            || self.children.iter().any(ProgressNode::has_failures)
    }

    /// Depth-first search for the first node with `label`.
    pub fn find(&self, label: &str) -> Option<&ProgressNode> {
        if self.label == label {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(label))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let status = match &self.status {
            NodeStatus::Running => "...".to_string(),
            NodeStatus::Done(outcome) if outcome.is_empty() => "done".to_string(),
            NodeStatus::Done(outcome) => outcome.clone(),
            NodeStatus::Failed(err) => format!("FAILED: {err}"),
        };
        writeln!(f, "{:indent$}{} [{}]", "", self.label, status, indent = depth * 2)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ProgressNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[derive(Debug)]
struct Slot {
    label: String,
    status: NodeStatus,
    children: Vec<usize>,
}

/// Progress tree for one job. Clones share the same nodes.
#[derive(Debug, Clone)]
pub struct ProgressTree {
    nodes: Arc<Mutex<Vec<Slot>>>,
}

impl ProgressTree {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(vec![Slot {
                label: label.into(),
                status: NodeStatus::Running,
                children: Vec::new(),
            }])),
        }
    }

    pub fn root(&self) -> ProgressHandle {
        ProgressHandle {
            tree: self.clone(),
            index: 0,
        }
    }

    pub fn snapshot(&self) -> ProgressNode {
        let nodes = self.nodes.lock();
        build(&nodes, 0)
    }
}

fn build(nodes: &[Slot], index: usize) -> ProgressNode {
    let slot = &nodes[index];
    ProgressNode {
        label: slot.label.clone(),
        status: slot.status.clone(),
        children: slot.children.iter().map(|&c| build(nodes, c)).collect(),
    }
}

/// Handle to one node of a [`ProgressTree`].
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tree: ProgressTree,
    index: usize,
}

impl ProgressHandle {
    /// Append a running child node.
    pub fn child(&self, label: impl Into<String>) -> ProgressHandle {
        let mut nodes = self.tree.nodes.lock();
        let index = nodes.len();
        nodes.push(Slot {
            label: label.into(),
            status: NodeStatus::Running,
            children: Vec::new(),
        });
        nodes[self.index].children.push(index);
        ProgressHandle {
            tree: self.tree.clone(),
            index,
        }
    }

    pub fn finish(&self, outcome: impl Into<String>) {
        self.set_status(NodeStatus::Done(outcome.into()));
    }

    pub fn fail(&self, error: &dyn fmt::Display) {
        self.set_status(NodeStatus::Failed(error.to_string()));
    }

    pub fn status(&self) -> NodeStatus {
        self.tree.nodes.lock()[self.index].status.clone()
    }

    fn set_status(&self, status: NodeStatus) {
        self.tree.nodes.lock()[self.index].status = status;
    }

    /// Run `op` under a new child labeled `label`, then mark the child done
    /// with `outcome(&value)` or failed with the error.
    pub async fn loading<T, E, F>(
        &self,
        label: impl Into<String>,
        outcome: impl FnOnce(&T) -> String,
        op: F,
    ) -> Result<T, E>
    where
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let node = self.child(label);
        let result = op.await;
        match &result {
            Ok(value) => node.finish(outcome(value)),
            Err(e) => node.fail(e),
        }
        result
    }

    /// Run `op`, recording an error on this node before handing it back.
    pub async fn catching<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let result = op.await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }
}

//! Depth-first walk over the instances reachable from a root
//!
//! Used by `StateManager::attach_graph` and available to callers that need a
//! different per-node state policy.

use std::collections::HashSet;

use crate::entry::EntityState;
use crate::errors::Result;
use crate::graph::InstanceId;
use crate::model::NavigationId;
use crate::state_manager::StateManager;

/// One instance reached during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNode {
    pub instance: InstanceId,
    /// The instance whose navigation led here; `None` for the root
    pub source: Option<InstanceId>,
    pub inbound_navigation: Option<NavigationId>,
}

impl GraphNode {
    pub fn root(instance: InstanceId) -> Self {
        Self {
            instance,
            source: None,
            inbound_navigation: None,
        }
    }

    fn child(&self, instance: InstanceId, navigation: NavigationId) -> Self {
        Self {
            instance,
            source: Some(self.instance),
            inbound_navigation: Some(navigation),
        }
    }
}

/// Per-node callback; returning `false` stops descent below the node
pub trait GraphNodeHandler {
    /// # Errors
    ///
    /// An error aborts the walk; nodes already handled keep their changes.
    fn handle(&mut self, tracker: &mut StateManager, node: &GraphNode) -> Result<bool>;
}

impl<F> GraphNodeHandler for F
where
    F: FnMut(&mut StateManager, &GraphNode) -> Result<bool>,
{
    fn handle(&mut self, tracker: &mut StateManager, node: &GraphNode) -> Result<bool> {
        self(tracker, node)
    }
}

/// Walk from `root` in preorder, collection elements individually
///
/// An instance is handed to the handler at most once per walk, so cyclic
/// graphs terminate even when the handler never vetoes.
///
/// # Errors
///
/// Propagates the first handler error.
pub fn traverse<H: GraphNodeHandler + ?Sized>(
    tracker: &mut StateManager,
    root: InstanceId,
    handler: &mut H,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut stack = vec![GraphNode::root(root)];
    while let Some(node) = stack.pop() {
        if !visited.insert(node.instance) {
            continue;
        }
        if !handler.handle(tracker, &node)? {
            continue;
        }
        let children = outbound(tracker, &node);
        // reversed so the first navigation's first element is handled next
        stack.extend(children.into_iter().rev());
    }
    Ok(())
}

pub(crate) fn outbound(tracker: &StateManager, node: &GraphNode) -> Vec<GraphNode> {
    let table = tracker.table();
    let Some(shape) = table.entity_type(node.instance) else {
        return Vec::new();
    };
    shape
        .navigations()
        .iter()
        .flat_map(|nav| {
            table
                .navigation_targets(node.instance, *nav)
                .into_iter()
                .map(move |target| node.child(target, *nav))
        })
        .collect()
}

/// State the default attach policy gives a node reached while painting the
/// graph with `target`; `None` when the node is already tracked
pub fn attach_state(tracker: &StateManager, node: &GraphNode, target: EntityState) -> Option<EntityState> {
    let table = tracker.table();
    if table.state(node.instance) != EntityState::Detached {
        return None;
    }
    if node.inbound_navigation.is_some() && !table.is_key_set(node.instance) {
        Some(EntityState::Added)
    } else {
        Some(target)
    }
}

/// Default attach policy: paint every detached node with the target state
#[derive(Debug, Clone, Copy)]
pub struct AttachHandler {
    target: EntityState,
    painted: usize,
}

impl AttachHandler {
    pub fn new(target: EntityState) -> Self {
        Self { target, painted: 0 }
    }

    pub fn painted(&self) -> usize {
        self.painted
    }
}

impl GraphNodeHandler for AttachHandler {
    fn handle(&mut self, tracker: &mut StateManager, node: &GraphNode) -> Result<bool> {
        let Some(state) = attach_state(tracker, node, self.target) else {
            return Ok(false);
        };
        tracker.change_state(node.instance, state, true, true)?;
        self.painted += 1;
        Ok(true)
    }
}

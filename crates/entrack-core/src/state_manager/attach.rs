//! Attaching object graphs

use std::collections::HashSet;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::entry::EntityState;
use crate::errors::Result;
use crate::graph::InstanceId;
use crate::graph_iterator::{attach_state, outbound, traverse, AttachHandler, GraphNode};
use crate::{log_op_end, log_op_error, log_op_start};

use super::StateManager;

impl StateManager {
    /// Track `root` and every detached instance reachable from it
    ///
    /// Instances reached through a navigation whose key is not yet set become
    /// Added; the others take `target_state`. Already tracked instances stop
    /// the walk. Returns the number of instances that started being tracked.
    ///
    /// # Errors
    ///
    /// The first transition error; instances attached before it stay tracked.
    pub fn attach_graph(&mut self, root: InstanceId, target_state: EntityState) -> Result<usize> {
        log_op_start!("attach_graph", instance = %root, new_state = %target_state);
        let start = Instant::now();

        let mut handler = AttachHandler::new(target_state);
        traverse(self, root, &mut handler).map_err(|e| {
            log_op_error!(
                "attach_graph",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "attach_graph",
            duration_ms = start.elapsed().as_millis() as u64,
            entry_count = handler.painted()
        );

        Ok(handler.painted())
    }

    /// Awaitable [`StateManager::attach_graph`]; value generators of nodes
    /// becoming Added are awaited one node at a time
    ///
    /// # Errors
    ///
    /// `Cancelled` once `cancellation` fires; nodes attached before that stay
    /// tracked. Otherwise as [`StateManager::attach_graph`].
    pub async fn attach_graph_async(
        &mut self,
        root: InstanceId,
        target_state: EntityState,
        cancellation: &CancellationToken,
    ) -> Result<usize> {
        log_op_start!("attach_graph_async", instance = %root, new_state = %target_state);
        let start = Instant::now();

        let result = self
            .attach_graph_async_impl(root, target_state, cancellation)
            .await;
        let painted = result.map_err(|e| {
            log_op_error!(
                "attach_graph_async",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "attach_graph_async",
            duration_ms = start.elapsed().as_millis() as u64,
            entry_count = painted
        );

        Ok(painted)
    }

    async fn attach_graph_async_impl(
        &mut self,
        root: InstanceId,
        target_state: EntityState,
        cancellation: &CancellationToken,
    ) -> Result<usize> {
        self.table.entry(root)?;
        let mut painted = 0;
        let mut visited = HashSet::new();
        let mut stack = vec![GraphNode::root(root)];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.instance) {
                continue;
            }
            let Some(state) = attach_state(self, &node, target_state) else {
                continue;
            };
            self.change_state_async(node.instance, state, true, true, cancellation)
                .await?;
            painted += 1;
            stack.extend(outbound(self, &node).into_iter().rev());
        }
        Ok(painted)
    }

    /// Track an instance newly referenced from a tracked one, with the
    /// detached part of its graph, as Added
    pub(crate) fn attach_untracked(&mut self, target: InstanceId) -> Result<()> {
        if self.is_tracked(target) {
            return Ok(());
        }
        let mut handler = AttachHandler::new(EntityState::Added);
        traverse(self, target, &mut handler)?;
        tracing::debug!(instance = %target, attached = handler.painted(), "reachable instances attached");
        Ok(())
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ExecuteError;
use crate::phase::{Phase, PhasePlan};
use crate::task::TaskDefinition;
use crate::tree::{GeneratorTree, NodeIdx};

/// Tasks registered by build steps, waiting for their phase.
#[derive(Default)]
pub(crate) struct DynamicQueue {
    pending: HashMap<String, Vec<(NodeIdx, Arc<TaskDefinition>)>>,
    names: HashSet<(NodeIdx, String)>,
}

impl DynamicQueue {
    /// Accepts a task registered by `task_id`, owned by `node`.
    pub fn register(
        &mut self,
        tree: &GeneratorTree,
        node: NodeIdx,
        task_id: &str,
        task: TaskDefinition,
        plan: &mut PhasePlan,
    ) -> Result<(), ExecuteError> {
        let name = task.name().to_string();
        let entry = tree.node(node);

        let Some(phase) = task.phase().cloned() else {
            return Err(ExecuteError::DynamicTaskMissingPhase {
                name,
                task_id: task_id.to_string(),
                path: tree.path(node),
            });
        };

        let clashes_static = entry.tasks().iter().any(|existing| existing.name() == name);
        if clashes_static || !self.names.insert((node, name.clone())) {
            return Err(ExecuteError::DuplicateDynamicTask {
                name,
                node_id: entry.id().to_string(),
                task_id: task_id.to_string(),
            });
        }

        task.validate(entry.id())?;
        plan.register(&phase)?;

        if plan.has_started(phase.name()) {
            return Err(ExecuteError::DynamicTaskPhaseStarted {
                name,
                task_id: task_id.to_string(),
                phase: phase.name().to_string(),
            });
        }

        tracing::debug!(task = %name, node = entry.id(), phase = phase.name(), "dynamic task registered");

        self.pending
            .entry(phase.name().to_string())
            .or_default()
            .push((node, Arc::new(task)));

        Ok(())
    }

    /// Removes the tasks waiting for `phase`, in registration order.
    pub fn take(&mut self, phase: &Phase) -> Vec<(NodeIdx, Arc<TaskDefinition>)> {
        self.pending.remove(phase.name()).unwrap_or_default()
    }
}

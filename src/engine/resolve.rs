//! Static wiring of a phase: every dependency is bound to its source before
//! any `run` step executes, and the tasks are ordered so that providers run
//! before their consumers.

use petgraph::Graph;
use petgraph::algo::toposort;

use crate::engine::PhaseTask;
use crate::engine::registry::{ExportIndex, Registries};
use crate::error::ExecuteError;
use crate::provider::{DependencyRequest, Value};
use crate::tree::GeneratorTree;

/// Where the value of a dependency comes from.
pub(crate) enum Source {
    /// An export of another task of the same phase.
    Export { from: usize, key: String },
    /// An output of a previous phase.
    Output(Value),
    /// An optional dependency nobody provides.
    Missing,
}

pub(crate) struct Wiring {
    /// Per task, in the order of the phase's task list.
    pub sources: Vec<Vec<(String, Source)>>,
    /// Order in which the `run` steps execute.
    pub order: Vec<usize>,
}

pub(crate) fn wire(
    tree: &GeneratorTree,
    tasks: &[PhaseTask],
    registries: &Registries,
    phase: &str,
) -> Result<Wiring, ExecuteError> {
    let exports = ExportIndex::build(tasks)?;

    let mut graph = Graph::<usize, ()>::with_capacity(tasks.len(), 0);
    let nodes: Vec<_> = (0..tasks.len()).map(|i| graph.add_node(i)).collect();
    let mut sources = Vec::with_capacity(tasks.len());

    for (i, task) in tasks.iter().enumerate() {
        let mut bound = Vec::with_capacity(task.definition.dependencies().len());

        for (key, request) in task.definition.dependencies() {
            let source = resolve(tree, tasks, i, key, request, &exports, registries)?;
            if let Source::Export { from, .. } = &source {
                graph.update_edge(nodes[*from], nodes[i], ());
            }
            bound.push((key.clone(), source));
        }

        sources.push(bound);
    }

    // Without edges the order is the pre-order the tasks were collected in.
    let order = toposort(&graph, None)
        .map_err(|cycle| ExecuteError::DependencyCycle {
            phase: phase.to_string(),
            task_id: tasks[graph[cycle.node_id()]].id.clone(),
        })?
        .into_iter()
        .map(|node| graph[node])
        .collect();

    Ok(Wiring { sources, order })
}

fn resolve(
    tree: &GeneratorTree,
    tasks: &[PhaseTask],
    index: usize,
    key: &str,
    request: &DependencyRequest,
    exports: &ExportIndex,
    registries: &Registries,
) -> Result<Source, ExecuteError> {
    let task = &tasks[index];
    let ty = request.type_id();

    if let Some(slot) = exports.find(tree, task.node, ty, index) {
        return Ok(Source::Export {
            from: slot.task,
            key: slot.key.clone(),
        });
    }

    if request.info.read_only
        && let Some(value) = registries.find_output(tree, task.node, ty)
    {
        return Ok(Source::Output(value.clone()));
    }

    if registries.is_retired(tree, task.node, ty) {
        return Err(ExecuteError::PhaseVisibilityViolation {
            dependency: key.to_string(),
            task_id: task.id.clone(),
            path: tree.path(task.node),
        });
    }

    if request.is_optional() {
        tracing::debug!(task = %task.id, dependency = key, "optional dependency not provided");
        return Ok(Source::Missing);
    }

    Err(ExecuteError::UnresolvedDependency {
        dependency: key.to_string(),
        task_id: task.id.clone(),
        path: tree.path(task.node),
    })
}

//! Execution of a generator tree.
//!
//! A run is a sequence of phases: the default phase first, then every named
//! phase after the phases it consumes. Each phase goes through two passes:
//!
//! 1. **provide**: dependencies are bound to their sources, then the `run`
//!    steps execute one by one, providers before consumers.
//! 2. **build**: the deferred build steps execute, deepest nodes first, and
//!    their effects are merged into the result in post-order.
//!
//! Exports from `run` live only for the phase. Outputs from `build` stay
//! visible to every later phase, but only read-only ones can be depended on.

mod build;
mod diagnostics;
mod dynamic;
mod provide;
mod registry;
mod resolve;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::build::Built;
use crate::engine::dynamic::DynamicQueue;
use crate::engine::registry::Registries;
use crate::error::ExecuteError;
use crate::output::{Aggregator, ExecutionResult};
use crate::phase::{self, Phase, PhasePlan};
use crate::task::{TaskDefinition, task_id};
use crate::tree::{GeneratorTree, NodeIdx};

pub use diagnostics::{Diagnostics, PhaseExecution, TaskExecution};

/// Knobs for [`execute`].
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Run the build steps of one tree level on the rayon pool.
    pub parallel: bool,
    /// Span the run reports under. Phase and task spans, and their task ids,
    /// nest below it. Defaults to the caller's current span.
    pub parent: Option<Span>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            parent: None,
        }
    }
}

/// A task taking part in the current phase.
pub(crate) struct PhaseTask {
    /// Position in the phase, pre-order of nodes then declaration order.
    pub seq: usize,
    pub id: String,
    pub node: NodeIdx,
    pub definition: Arc<TaskDefinition>,
}

/// Runs every task of the tree and collects what they produced.
///
/// The first failure aborts the run. Nothing collected up to that point is
/// returned.
pub fn execute(
    tree: &GeneratorTree,
    options: &ExecuteOptions,
) -> Result<ExecutionResult, ExecuteError> {
    let span = match &options.parent {
        Some(parent) => tracing::span!(parent: parent, Level::INFO, "execute", nodes = tree.len()),
        None => tracing::span!(Level::INFO, "execute", nodes = tree.len()),
    };
    let _enter = span.enter();

    let mut execution = Execution::new(tree, options)?;

    execution.run_phase(None)?;
    while let Some(phase) = execution.phases.next()? {
        execution.run_phase(Some(&phase))?;
    }

    let result = execution.finish();
    tracing::info!(
        files = result.files.len(),
        commands = result.post_write_commands.len(),
        phases = result.diagnostics.phases.len(),
        "execution finished"
    );

    Ok(result)
}

struct Execution<'a> {
    tree: &'a GeneratorTree,
    options: &'a ExecuteOptions,
    phases: PhasePlan,
    queue: DynamicQueue,
    registries: Registries,
    aggregator: Aggregator,
    diagnostics: Diagnostics,
}

impl<'a> Execution<'a> {
    fn new(tree: &'a GeneratorTree, options: &'a ExecuteOptions) -> Result<Self, ExecuteError> {
        let mut phases = PhasePlan::new();
        for idx in tree.pre_order() {
            for task in tree.node(idx).tasks() {
                if let Some(phase) = task.phase() {
                    phases.register(phase)?;
                }
            }
        }

        Ok(Self {
            tree,
            options,
            phases,
            queue: DynamicQueue::default(),
            registries: Registries::default(),
            aggregator: Aggregator::default(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Static tasks of the phase, then the dynamic ones registered for it,
    /// node by node in pre-order.
    fn collect(&mut self, phase: Option<&Phase>) -> Vec<PhaseTask> {
        let mut dynamic: HashMap<NodeIdx, Vec<Arc<TaskDefinition>>> = HashMap::new();
        if let Some(phase) = phase {
            for (node, task) in self.queue.take(phase) {
                dynamic.entry(node).or_default().push(task);
            }
        }

        let mut tasks = Vec::new();
        for idx in self.tree.pre_order() {
            let node = self.tree.node(idx);
            let statics = node.tasks().iter().filter(|task| task.in_phase(phase)).cloned();
            let dynamics = dynamic.remove(&idx).unwrap_or_default();

            for definition in statics.chain(dynamics) {
                tasks.push(PhaseTask {
                    seq: tasks.len(),
                    id: task_id(node.id(), definition.name()),
                    node: idx,
                    definition,
                });
            }
        }

        tasks
    }

    fn run_phase(&mut self, phase: Option<&Phase>) -> Result<(), ExecuteError> {
        let label = phase::label(phase).to_string();
        let start = Instant::now();
        let tasks = self.collect(phase);

        let span = tracing::span!(Level::INFO, "phase", name = %label, tasks = tasks.len());
        span.pb_set_style(&crate::utils::progress_style());
        span.pb_set_length(tasks.len() as u64);
        span.pb_set_message(&format!("Phase {label}"));
        let _enter = span.enter();

        let wiring = resolve::wire(self.tree, &tasks, &self.registries, &label)?;
        let pending = provide::provide(
            self.tree,
            &tasks,
            wiring,
            &label,
            &span,
            &mut self.diagnostics,
        )?;
        span.pb_set_length((tasks.len() + pending.len()) as u64);

        for task in &tasks {
            for export in task.definition.exports().values() {
                self.registries.retire(task.node, export);
            }
        }

        let built = build::build(self.tree, pending, self.options.parallel, &span)?;
        self.merge(built)?;

        let duration = start.elapsed();
        tracing::info!(tasks = tasks.len(), "phase {label} done in {duration:?}");

        self.diagnostics.phases.push(PhaseExecution {
            name: label,
            tasks: tasks.len(),
            duration,
        });

        Ok(())
    }

    /// Folds the finished build steps of a phase into the run, in post-order.
    fn merge(&mut self, built: Vec<Built>) -> Result<(), ExecuteError> {
        for Built {
            task_id,
            node,
            path,
            outputs,
            providers,
            builder,
            duration,
            ..
        } in built
        {
            providers
                .validate("output", &outputs)
                .map_err(|error| ExecuteError::Provider {
                    task_id: task_id.clone(),
                    path: path.clone(),
                    error,
                })?;

            for (key, export) in &outputs {
                if let Some(value) = providers.values.get(key) {
                    self.registries
                        .add_output(node, &task_id, export, value.clone())?;
                }
            }

            self.aggregator.merge(builder.files, builder.commands)?;

            for task in builder.dynamic_tasks {
                self.queue
                    .register(self.tree, node, &task_id, task, &mut self.phases)?;
            }

            if let Some(execution) = self.diagnostics.execution_times.get_mut(&task_id) {
                execution.build = Some(duration);
            }
        }

        Ok(())
    }

    fn finish(self) -> ExecutionResult {
        self.aggregator.finish(self.diagnostics)
    }
}

/// Runs a task step, turning a panic into an error.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    }
}

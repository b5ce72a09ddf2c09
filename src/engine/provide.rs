//! The provide pass: runs the `run` step of every task of a phase, in wiring
//! order, and collects the deferred build steps.

use std::collections::BTreeMap;
use std::time::Instant;

use camino::Utf8PathBuf;
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::context::TaskContext;
use crate::engine::resolve::{Source, Wiring};
use crate::engine::{Diagnostics, PhaseTask, TaskExecution, catch_panic};
use crate::error::ExecuteError;
use crate::provider::{ProviderExport, Providers, Resolved};
use crate::task::BuildFn;
use crate::tree::{GeneratorTree, NodeIdx};

/// A build step waiting for the build pass.
pub(crate) struct PendingBuild {
    pub seq: usize,
    pub task_id: String,
    pub node: NodeIdx,
    pub depth: usize,
    pub path: String,
    pub generator: String,
    pub base_directory: Utf8PathBuf,
    pub outputs: BTreeMap<String, ProviderExport>,
    pub build: BuildFn,
}

pub(crate) fn provide(
    tree: &GeneratorTree,
    tasks: &[PhaseTask],
    wiring: Wiring,
    phase: &str,
    span: &Span,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<PendingBuild>, ExecuteError> {
    let Wiring { mut sources, order } = wiring;
    let mut provided: Vec<Option<Providers>> = (0..tasks.len()).map(|_| None).collect();
    let mut pending = Vec::new();

    for i in order {
        let task = &tasks[i];
        let node = tree.node(task.node);

        let mut resolved = Resolved::default();
        for (key, source) in std::mem::take(&mut sources[i]) {
            let value = match source {
                Source::Export { from, key } => provided[from]
                    .as_ref()
                    .and_then(|providers| providers.values.get(&key))
                    .cloned(),
                Source::Output(value) => Some(value),
                Source::Missing => None,
            };
            resolved.values.insert(key, value);
        }

        let task_span = tracing::debug_span!(parent: span, "task", id = %task.id);
        let _enter = task_span.enter();

        let context = TaskContext {
            task_id: &task.id,
            node_id: node.id(),
            generator: node.generator(),
            base_directory: node.base_directory(),
            phase: task.definition.phase().map(|phase| phase.name()),
            span: &task_span,
        };

        let start = Instant::now();
        let run = catch_panic(|| (task.definition.run)(&context, resolved)).map_err(|error| {
            ExecuteError::Task {
                task_id: task.id.clone(),
                path: tree.path(task.node),
                error,
            }
        })?;
        let elapsed = start.elapsed();

        run.providers
            .validate("export", task.definition.exports())
            .map_err(|error| ExecuteError::Provider {
                task_id: task.id.clone(),
                path: tree.path(task.node),
                error,
            })?;

        tracing::debug!(
            exports = run.providers.len(),
            deferred = run.build.is_some(),
            "ran in {elapsed:?}"
        );

        diagnostics.execution_times.insert(
            task.id.clone(),
            TaskExecution {
                phase: phase.to_string(),
                start,
                run: elapsed,
                build: None,
            },
        );

        if let Some(build) = run.build {
            pending.push(PendingBuild {
                seq: task.seq,
                task_id: task.id.clone(),
                node: task.node,
                depth: node.depth(),
                path: tree.path(task.node),
                generator: node.generator().to_string(),
                base_directory: node.base_directory().to_path_buf(),
                outputs: task.definition.outputs().clone(),
                build,
            });
        } else if !task.definition.outputs().is_empty() {
            // Declared outputs without a build step can never be produced.
            Providers::new()
                .validate("output", task.definition.outputs())
                .map_err(|error| ExecuteError::Provider {
                    task_id: task.id.clone(),
                    path: tree.path(task.node),
                    error,
                })?;
        }

        provided[i] = Some(run.providers);
        span.pb_inc(1);
    }

    Ok(pending)
}

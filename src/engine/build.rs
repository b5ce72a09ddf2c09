//! The build pass: runs the deferred build steps of a phase, deepest nodes
//! first, and hands their builders back in post-order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::builder::TaskOutputBuilder;
use crate::engine::catch_panic;
use crate::engine::provide::PendingBuild;
use crate::error::ExecuteError;
use crate::provider::{ProviderExport, Providers};
use crate::tree::{GeneratorTree, NodeIdx};

/// A finished build step.
pub(crate) struct Built {
    pub seq: usize,
    pub task_id: String,
    pub node: NodeIdx,
    pub path: String,
    pub outputs: BTreeMap<String, ProviderExport>,
    pub providers: Providers,
    pub builder: TaskOutputBuilder,
    pub duration: Duration,
}

/// Build steps of one depth never depend on each other, so each level can be
/// run in parallel. Levels are separated by a barrier, so every descendant of
/// a node is built before the node itself.
pub(crate) fn build(
    tree: &GeneratorTree,
    pending: Vec<PendingBuild>,
    parallel: bool,
    span: &Span,
) -> Result<Vec<Built>, ExecuteError> {
    let mut levels: BTreeMap<usize, Vec<PendingBuild>> = BTreeMap::new();
    for build in pending {
        levels.entry(build.depth).or_default().push(build);
    }

    let mut built = Vec::new();

    for (depth, mut level) in levels.into_iter().rev() {
        level.sort_by_key(|build| (tree.post_rank(build.node), build.seq));
        tracing::debug!(depth, tasks = level.len(), "building level");

        let results: Vec<_> = if parallel {
            level
                .into_par_iter()
                .map(|build| run_build(build, span))
                .collect()
        } else {
            level
                .into_iter()
                .map(|build| run_build(build, span))
                .collect()
        };

        for result in results {
            built.push(result?);
        }
    }

    built.sort_by_key(|built| (tree.post_rank(built.node), built.seq));
    Ok(built)
}

fn run_build(pending: PendingBuild, parent: &Span) -> Result<Built, ExecuteError> {
    let span = tracing::debug_span!(parent: parent, "build", id = %pending.task_id);
    let _enter = span.enter();

    let mut builder = TaskOutputBuilder::new(
        &pending.generator,
        &pending.task_id,
        &pending.base_directory,
    );

    let start = Instant::now();
    let build = pending.build;
    let providers = catch_panic(|| build(&mut builder)).map_err(|error| ExecuteError::Task {
        task_id: pending.task_id.clone(),
        path: pending.path.clone(),
        error,
    })?;
    let duration = start.elapsed();

    tracing::debug!(
        files = builder.files.len(),
        commands = builder.commands.len(),
        "built in {duration:?}"
    );
    parent.pb_inc(1);

    Ok(Built {
        seq: pending.seq,
        task_id: pending.task_id,
        node: pending.node,
        path: pending.path,
        outputs: pending.outputs,
        providers,
        builder,
        duration,
    })
}

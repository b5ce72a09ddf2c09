//! Task definitions.
//!
//! A task is the smallest schedulable unit. It has two steps:
//!
//! * `run` receives the resolved dependencies and returns the providers the
//!   task exports. It is meant to be cheap wiring.
//! * `build`, optionally returned from `run`, is deferred until every task of
//!   the phase has been wired. It receives a [`TaskOutputBuilder`] to write
//!   files and commands, and returns the task's outputs.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builder::TaskOutputBuilder;
use crate::context::TaskContext;
use crate::error::TreeError;
use crate::phase::Phase;
use crate::provider::{DependencyRequest, ProviderExport, Providers, Resolved};

/// Deferred build step of a task.
pub type BuildFn = Box<dyn FnOnce(&mut TaskOutputBuilder) -> anyhow::Result<Providers> + Send>;

type RunFn = dyn Fn(&TaskContext<'_>, Resolved) -> anyhow::Result<TaskRun> + Send + Sync;

/// A declared task owned by a generator node.
pub struct TaskDefinition {
    pub(crate) name: Cow<'static, str>,
    pub(crate) phase: Option<Phase>,
    pub(crate) dependencies: BTreeMap<String, DependencyRequest>,
    pub(crate) exports: BTreeMap<String, ProviderExport>,
    pub(crate) outputs: BTreeMap<String, ProviderExport>,
    pub(crate) run: Arc<RunFn>,
}

impl TaskDefinition {
    /// Starts declaring a task.
    ///
    /// ```rust
    /// use gentree::{Providers, TaskDefinition, TaskRun, FileOptions};
    ///
    /// let task = TaskDefinition::builder("readme").run(|_, _| {
    ///     Ok(TaskRun::new().build(|builder| {
    ///         builder.write_file("readme", "README.md", "# Hello", FileOptions::default());
    ///         Ok(Providers::new())
    ///     }))
    /// });
    ///
    /// assert_eq!(task.name(), "readme");
    /// ```
    pub fn builder(name: impl Into<Cow<'static, str>>) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            phase: None,
            dependencies: BTreeMap::new(),
            exports: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Option<&Phase> {
        self.phase.as_ref()
    }

    pub fn dependencies(&self) -> &BTreeMap<String, DependencyRequest> {
        &self.dependencies
    }

    pub fn exports(&self) -> &BTreeMap<String, ProviderExport> {
        &self.exports
    }

    pub fn outputs(&self) -> &BTreeMap<String, ProviderExport> {
        &self.outputs
    }

    pub(crate) fn in_phase(&self, phase: Option<&Phase>) -> bool {
        self.phase.as_ref().map(Phase::name) == phase.map(Phase::name)
    }

    /// Structural checks that do not depend on the rest of the tree.
    pub(crate) fn validate(&self, node_id: &str) -> Result<(), TreeError> {
        if self.name.is_empty() {
            return Err(TreeError::EmptyTaskName {
                node: node_id.to_string(),
            });
        }

        for (key, output) in &self.outputs {
            if !output.info.read_only {
                return Err(TreeError::OutputNotReadOnly {
                    task_id: task_id(node_id, &self.name),
                    output: key.clone(),
                    provider: output.info.name.to_string(),
                });
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("phase", &self.phase.as_ref().map(Phase::name))
            .field("dependencies", &self.dependencies.keys().collect::<Vec<_>>())
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

pub(crate) fn task_id(node_id: &str, name: &str) -> String {
    format!("{node_id}#{name}")
}

/// Collects the declaration of a task until its `run` step is attached.
pub struct TaskBuilder {
    name: Cow<'static, str>,
    phase: Option<Phase>,
    dependencies: BTreeMap<String, DependencyRequest>,
    exports: BTreeMap<String, ProviderExport>,
    outputs: BTreeMap<String, ProviderExport>,
}

impl TaskBuilder {
    pub fn phase(mut self, phase: &Phase) -> Self {
        self.phase = Some(phase.clone());
        self
    }

    pub fn depends_on(mut self, key: impl Into<String>, request: impl Into<DependencyRequest>) -> Self {
        self.dependencies.insert(key.into(), request.into());
        self
    }

    pub fn exports(mut self, key: impl Into<String>, export: impl Into<ProviderExport>) -> Self {
        self.exports.insert(key.into(), export.into());
        self
    }

    /// Declares a phase-crossing output, returned from the build step. The
    /// provider type must be read-only.
    pub fn outputs(mut self, key: impl Into<String>, export: impl Into<ProviderExport>) -> Self {
        self.outputs.insert(key.into(), export.into());
        self
    }

    pub fn run<F>(self, run: F) -> TaskDefinition
    where
        F: Fn(&TaskContext<'_>, Resolved) -> anyhow::Result<TaskRun> + Send + Sync + 'static,
    {
        TaskDefinition {
            name: self.name,
            phase: self.phase,
            dependencies: self.dependencies,
            exports: self.exports,
            outputs: self.outputs,
            run: Arc::new(run),
        }
    }
}

/// What a task's `run` step hands back: its exported providers and the
/// deferred build step.
#[derive(Default)]
pub struct TaskRun {
    pub(crate) providers: Providers,
    pub(crate) build: Option<BuildFn>,
}

impl TaskRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.providers.insert(key, value);
        self
    }

    pub fn provide_arc<T>(mut self, key: impl Into<String>, value: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.providers.insert_arc(key, value);
        self
    }

    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers.values.extend(providers.values);
        self
    }

    pub fn build<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut TaskOutputBuilder) -> anyhow::Result<Providers> + Send + 'static,
    {
        self.build = Some(Box::new(build));
        self
    }
}

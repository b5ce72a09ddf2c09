use camino::Utf8PathBuf;
use thiserror::Error;

/// Raised while turning a generator description into a [`GeneratorTree`].
/// Nothing has run when one of these is returned.
///
/// [`GeneratorTree`]: crate::GeneratorTree
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Generator node under '{parent}' has an empty id")]
    EmptyNodeId { parent: String },

    #[error("Duplicate generator node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Task '{task}' is declared more than once on node '{node}'")]
    DuplicateTask { node: String, task: String },

    #[error("Task on node '{node}' has an empty name")]
    EmptyTaskName { node: String },

    #[error(
        "Output '{output}' of task '{task_id}' uses provider type '{provider}', which is not read-only"
    )]
    OutputNotReadOnly {
        task_id: String,
        output: String,
        provider: String,
    },

    #[error("Unknown generator '{generator}' for node '{node}'")]
    UnknownGenerator { node: String, generator: String },

    #[error("Generator '{generator}' could not create tasks for node '{node}':\n{error:#}")]
    Factory {
        node: String,
        generator: String,
        error: anyhow::Error,
    },

    #[error("Invalid generator tree description:\n{0}")]
    Descriptor(#[from] serde_json::Error),
}

/// Problems with provider values crossing the task boundary, either when a
/// task reads its resolved dependencies or when the engine checks what a task
/// handed back from `run` or `build`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Dependency '{0}' was not declared by this task")]
    UnknownDependency(String),

    #[error("Optional dependency '{0}' was not resolved")]
    NotResolved(String),

    #[error("Dependency '{key}' holds '{actual}', not '{expected}'")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Declared {kind} '{key}' was not provided")]
    Missing { kind: &'static str, key: String },

    #[error("'{key}' is not a declared {kind}")]
    Undeclared { kind: &'static str, key: String },

    #[error("The {kind} '{key}' must hold '{expected}' but holds '{actual}'")]
    TypeMismatch {
        kind: &'static str,
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Every way a single [`execute`](crate::execute) call can fail. All of them
/// abort the whole run, nothing collected up to that point is returned.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Could not resolve dependency '{dependency}' in '{task_id}' (at {path})")]
    UnresolvedDependency {
        dependency: String,
        task_id: String,
        path: String,
    },

    #[error(
        "Dependency '{dependency}' in '{task_id}' (at {path}) cannot come from a previous phase since it is not read-only"
    )]
    PhaseVisibilityViolation {
        dependency: String,
        task_id: String,
        path: String,
    },

    #[error("Dynamic task '{name}' registered by '{task_id}' (at {path}) must have a phase")]
    DynamicTaskMissingPhase {
        name: String,
        task_id: String,
        path: String,
    },

    #[error("Dynamic task '{name}' already exists on node '{node_id}' (registered again by '{task_id}')")]
    DuplicateDynamicTask {
        name: String,
        node_id: String,
        task_id: String,
    },

    #[error(
        "Dynamic task '{name}' registered by '{task_id}' targets phase '{phase}', which has already started"
    )]
    DynamicTaskPhaseStarted {
        name: String,
        task_id: String,
        phase: String,
    },

    #[error("Destination '{destination}' is written by both '{first}' and '{second}'")]
    OutputConflict {
        destination: Utf8PathBuf,
        first: String,
        second: String,
    },

    #[error("Provider '{provider}' is exported by both '{first}' and '{second}' in the same scope")]
    ProviderConflict {
        provider: String,
        first: String,
        second: String,
    },

    #[error("Phase '{0}' is declared more than once with different inputs")]
    PhaseNameCollision(String),

    #[error("Phases form a cycle through '{0}'")]
    PhaseCycle(String),

    #[error("Tasks in phase '{phase}' depend on each other in a cycle through '{task_id}'")]
    DependencyCycle { phase: String, task_id: String },

    #[error("Task '{task_id}' (at {path}): {error}")]
    Provider {
        task_id: String,
        path: String,
        error: ProviderError,
    },

    #[error("Task '{task_id}' (at {path}) failed:\n{error:#}")]
    Task {
        task_id: String,
        path: String,
        error: anyhow::Error,
    },
}

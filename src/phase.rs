use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::toposort;

use crate::error::ExecuteError;

/// A named execution stage.
///
/// Tasks without a phase run in the implicit default phase, which always runs
/// first. Named phases run afterwards, in an order consistent with their
/// "consumes output from" edges: a phase runs only once every phase it
/// consumes has finished, so the outputs it reads are final.
///
/// Phases compare by name.
#[derive(Clone)]
pub struct Phase(Arc<PhaseInner>);

struct PhaseInner {
    name: Arc<str>,
    consumes: Vec<Phase>,
}

impl Phase {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::consuming(name, std::iter::empty::<&Phase>())
    }

    pub fn consuming<'a>(
        name: impl Into<Arc<str>>,
        inputs: impl IntoIterator<Item = &'a Phase>,
    ) -> Self {
        Self(Arc::new(PhaseInner {
            name: name.into(),
            consumes: inputs.into_iter().cloned().collect(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn consumes(&self) -> &[Phase] {
        &self.0.consumes
    }

    fn same_declaration(&self, other: &Phase) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }

        let mut a: Vec<_> = self.consumes().iter().map(Phase::name).collect();
        let mut b: Vec<_> = other.consumes().iter().map(Phase::name).collect();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Phase {}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name())
            .field(
                "consumes",
                &self.consumes().iter().map(Phase::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Label used for a phase in logs and errors.
pub(crate) fn label(phase: Option<&Phase>) -> &str {
    phase.map_or("default", Phase::name)
}

/// The set of named phases known to a run and which of them have started.
///
/// Phases can become known while the run is in progress, when a build step
/// registers a dynamic task for a phase nobody declared statically. The order
/// is therefore recomputed every time the next phase is picked.
#[derive(Default)]
pub(crate) struct PhasePlan {
    known: Vec<Phase>,
    index: HashMap<Arc<str>, usize>,
    started: HashSet<Arc<str>>,
}

impl PhasePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a phase and everything it consumes.
    pub fn register(&mut self, phase: &Phase) -> Result<(), ExecuteError> {
        if self.check_known(phase)? {
            return Ok(());
        }

        for input in phase.consumes() {
            self.register(input)?;
        }

        // An input may have claimed the name while being registered.
        if self.check_known(phase)? {
            return Ok(());
        }

        self.index.insert(phase.0.name.clone(), self.known.len());
        self.known.push(phase.clone());
        Ok(())
    }

    /// Whether a phase with this name is already known, failing if it was
    /// declared differently.
    fn check_known(&self, phase: &Phase) -> Result<bool, ExecuteError> {
        match self.index.get(phase.name()) {
            Some(&existing) if self.known[existing].same_declaration(phase) => Ok(true),
            Some(_) => Err(ExecuteError::PhaseNameCollision(phase.name().to_string())),
            None => Ok(false),
        }
    }

    pub fn has_started(&self, name: &str) -> bool {
        self.started.contains(name)
    }

    /// Picks the next phase to run and marks it as started.
    pub fn next(&mut self) -> Result<Option<Phase>, ExecuteError> {
        let mut graph = Graph::<usize, ()>::with_capacity(self.known.len(), 0);
        let nodes: Vec<_> = (0..self.known.len()).map(|i| graph.add_node(i)).collect();

        for (i, phase) in self.known.iter().enumerate() {
            for input in phase.consumes() {
                let from = self.index[input.name()];
                graph.add_edge(nodes[from], nodes[i], ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            ExecuteError::PhaseCycle(self.known[graph[cycle.node_id()]].name().to_string())
        })?;

        let next = order
            .into_iter()
            .map(|node| &self.known[graph[node]])
            .find(|phase| !self.started.contains(phase.name()))
            .cloned();

        if let Some(phase) = &next {
            self.started.insert(phase.0.name.clone());
        }

        Ok(next)
    }
}

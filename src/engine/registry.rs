//! Provider registries.
//!
//! Two kinds of state are involved in resolving a dependency:
//!
//! * [`ExportIndex`] holds the exports *declared* by the tasks of the phase
//!   being run. It is rebuilt for every phase and thrown away afterwards,
//!   which is what makes `run` providers phase-local.
//! * [`Registries`] lives for the whole run: the outputs produced by build
//!   steps of finished phases, plus a record of which phase-local exports
//!   existed so an attempt to reach one from a later phase can be reported as
//!   such instead of as a missing provider.
//!
//! Both are append-only. Exporting the same type twice into one scope is an
//! error, never an overwrite.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::engine::PhaseTask;
use crate::error::ExecuteError;
use crate::provider::{ProviderExport, ProviderTypeId, Scope, Value};
use crate::tree::{GeneratorTree, NodeIdx};

/// Where a declared export lives: which task of the phase, under which key.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub task: usize,
    pub key: String,
}

#[derive(Default)]
pub(crate) struct ExportIndex {
    subtree: HashMap<(NodeIdx, ProviderTypeId), Slot>,
    project: HashMap<ProviderTypeId, Slot>,
}

impl ExportIndex {
    pub fn build(tasks: &[PhaseTask]) -> Result<Self, ExecuteError> {
        let mut index = Self::default();

        for (i, task) in tasks.iter().enumerate() {
            for (key, export) in task.definition.exports() {
                let slot = Slot {
                    task: i,
                    key: key.clone(),
                };

                let previous = match export.scope() {
                    Scope::Subtree => insert_slot(index.subtree.entry((task.node, export.type_id())), slot),
                    Scope::Project => insert_slot(index.project.entry(export.type_id()), slot),
                };

                if let Some(previous) = previous {
                    return Err(ExecuteError::ProviderConflict {
                        provider: export.type_name().to_string(),
                        first: tasks[previous].id.clone(),
                        second: task.id.clone(),
                    });
                }
            }
        }

        Ok(index)
    }

    /// Finds the export of type `ty` visible from `node`, ignoring the exports
    /// of the requesting task itself.
    pub fn find(
        &self,
        tree: &GeneratorTree,
        node: NodeIdx,
        ty: ProviderTypeId,
        requester: usize,
    ) -> Option<&Slot> {
        tree.ancestors(node)
            .filter_map(|idx| self.subtree.get(&(idx, ty)))
            .find(|slot| slot.task != requester)
            .or_else(|| self.project.get(&ty).filter(|slot| slot.task != requester))
    }
}

/// Returns the task already holding the entry, if any.
fn insert_slot<K>(entry: Entry<'_, K, Slot>, slot: Slot) -> Option<usize> {
    match entry {
        Entry::Occupied(entry) => Some(entry.get().task),
        Entry::Vacant(entry) => {
            entry.insert(slot);
            None
        }
    }
}

/// Registry entry for an output, remembering who produced it.
struct Stored {
    value: Value,
    owner: String,
}

#[derive(Default)]
pub(crate) struct Registries {
    outputs: HashMap<(NodeIdx, ProviderTypeId), Stored>,
    project_outputs: HashMap<ProviderTypeId, Stored>,
    retired: HashSet<(NodeIdx, ProviderTypeId)>,
    retired_project: HashSet<ProviderTypeId>,
}

impl Registries {
    pub fn find_output(
        &self,
        tree: &GeneratorTree,
        node: NodeIdx,
        ty: ProviderTypeId,
    ) -> Option<&Value> {
        tree.ancestors(node)
            .find_map(|idx| self.outputs.get(&(idx, ty)))
            .or_else(|| self.project_outputs.get(&ty))
            .map(|stored| &stored.value)
    }

    /// Whether a phase that already finished had a phase-local export of `ty`
    /// visible from `node`.
    pub fn is_retired(&self, tree: &GeneratorTree, node: NodeIdx, ty: ProviderTypeId) -> bool {
        tree.ancestors(node)
            .any(|idx| self.retired.contains(&(idx, ty)))
            || self.retired_project.contains(&ty)
    }

    pub fn retire(&mut self, node: NodeIdx, export: &ProviderExport) {
        match export.scope() {
            Scope::Subtree => {
                self.retired.insert((node, export.type_id()));
            }
            Scope::Project => {
                self.retired_project.insert(export.type_id());
            }
        }
    }

    pub fn add_output(
        &mut self,
        node: NodeIdx,
        owner: &str,
        export: &ProviderExport,
        value: Value,
    ) -> Result<(), ExecuteError> {
        match export.scope() {
            Scope::Subtree => {
                insert_output(self.outputs.entry((node, export.type_id())), owner, export, value)
            }
            Scope::Project => {
                insert_output(self.project_outputs.entry(export.type_id()), owner, export, value)
            }
        }
    }
}

fn insert_output<K>(
    entry: Entry<'_, K, Stored>,
    owner: &str,
    export: &ProviderExport,
    value: Value,
) -> Result<(), ExecuteError> {
    match entry {
        Entry::Occupied(entry) => Err(ExecuteError::ProviderConflict {
            provider: export.type_name().to_string(),
            first: entry.get().owner.clone(),
            second: owner.to_string(),
        }),
        Entry::Vacant(entry) => {
            entry.insert(Stored {
                value,
                owner: owner.to_string(),
            });
            Ok(())
        }
    }
}

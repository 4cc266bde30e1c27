//! Prerequisite graph ordering
//!
//! Splits a set of loaded modules into topological layers: every module in
//! a layer only depends on modules in earlier layers, so a layer can be
//! evaluated in parallel. Modules on or behind a prerequisite cycle never
//! reach in-degree zero and are returned separately.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{Module, ModuleId};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Layers {
    pub layers: Vec<Vec<ModuleId>>,
    /// Modules that sit on a cycle or depend on one, in ascending id order
    pub cyclic: Vec<ModuleId>,
}

/// Kahn's algorithm over the prerequisite edges between known modules.
/// Prerequisite ids that are not in `modules` are ignored.
pub(crate) fn layers(modules: &HashMap<ModuleId, Module>) -> Layers {
    let mut in_degree: BTreeMap<ModuleId, usize> = modules.keys().map(|id| (*id, 0)).collect();
    let mut dependents: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();

    for module in modules.values() {
        let prerequisites: BTreeSet<ModuleId> = module
            .prerequisite_module_ids
            .iter()
            .copied()
            .filter(|id| modules.contains_key(id))
            .collect();
        for prerequisite in prerequisites {
            *in_degree.entry(module.id).or_default() += 1;
            dependents.entry(prerequisite).or_default().push(module.id);
        }
    }

    let mut layers = Vec::new();
    let mut ready: Vec<ModuleId> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();

    while !ready.is_empty() {
        let mut next = Vec::new();
        for id in &ready {
            in_degree.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        next.sort_unstable();
        layers.push(std::mem::replace(&mut ready, next));
    }

    Layers {
        layers,
        cyclic: in_degree.into_keys().collect(),
    }
}

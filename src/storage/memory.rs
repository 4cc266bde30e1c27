//! In-memory store
//!
//! Not durable. Used by tests and by callers that already hold the course
//! in memory and only want evaluations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{ProgressionError, Result};
use crate::model::{CompletionFact, ItemId, LearnerId, Module, ModuleId, Progression, RequirementKind};

use super::ProgressionStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    learners: Mutex<HashSet<LearnerId>>,
    modules: Mutex<BTreeMap<ModuleId, Module>>,
    facts: Mutex<HashMap<(LearnerId, ItemId), Vec<CompletionFact>>>,
    progressions: Mutex<HashMap<(LearnerId, ModuleId), Progression>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        m.lock()
            .map_err(|e| ProgressionError::Poisoned(format!("memory store: {:?}", e)))
    }

    pub fn add_learner(&self, learner_id: LearnerId) -> Result<()> {
        self.lock(&self.learners)?.insert(learner_id);
        Ok(())
    }

    /// Insert or replace a module definition
    pub fn put_module(&self, module: Module) -> Result<()> {
        self.lock(&self.modules)?.insert(module.id, module);
        Ok(())
    }

    pub fn remove_module(&self, module_id: ModuleId) -> Result<()> {
        self.lock(&self.modules)?.remove(&module_id);
        Ok(())
    }

    /// Record a fact, replacing an earlier fact of the same kind for the item
    pub fn record(&self, learner_id: LearnerId, fact: CompletionFact) -> Result<()> {
        let mut facts = self.lock(&self.facts)?;
        let entry = facts.entry((learner_id, fact.item_id)).or_default();
        entry.retain(|f| f.kind != fact.kind);
        entry.push(fact);
        Ok(())
    }

    pub fn forget(&self, learner_id: LearnerId, item_id: ItemId, kind: RequirementKind) -> Result<()> {
        let mut facts = self.lock(&self.facts)?;
        if let Some(entry) = facts.get_mut(&(learner_id, item_id)) {
            entry.retain(|f| f.kind != kind);
        }
        Ok(())
    }

    /// Number of stored progressions, for tests that inspect persistence
    pub fn progression_count(&self) -> Result<usize> {
        Ok(self.lock(&self.progressions)?.len())
    }
}

impl ProgressionStore for MemoryStore {
    fn learner_exists(&self, learner_id: LearnerId) -> Result<bool> {
        Ok(self.lock(&self.learners)?.contains(&learner_id))
    }

    fn load_module(&self, module_id: ModuleId) -> Result<Option<Module>> {
        Ok(self.lock(&self.modules)?.get(&module_id).cloned())
    }

    fn module_ids(&self) -> Result<Vec<ModuleId>> {
        Ok(self.lock(&self.modules)?.keys().copied().collect())
    }

    fn completions_for(
        &self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, Vec<CompletionFact>>> {
        let facts = self.lock(&self.facts)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| {
                facts
                    .get(&(learner_id, *id))
                    .filter(|list| !list.is_empty())
                    .map(|list| (*id, list.clone()))
            })
            .collect())
    }

    fn load_progression(&self, learner_id: LearnerId, module_id: ModuleId) -> Result<Option<Progression>> {
        Ok(self.lock(&self.progressions)?.get(&(learner_id, module_id)).cloned())
    }

    fn save_progression(&self, progression: &Progression) -> Result<()> {
        self.lock(&self.progressions)?
            .insert((progression.learner_id, progression.module_id), progression.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_record_replaces_same_kind() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.record(1, CompletionFact::scored(10, 40.0, now)).unwrap();
        store.record(1, CompletionFact::scored(10, 80.0, now)).unwrap();
        store.record(1, CompletionFact::new(10, RequirementKind::MustView, now)).unwrap();

        let facts = store.completions_for(1, &[10, 11]).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[&10].len(), 2);
        assert!(facts[&10].iter().any(|f| f.score == Some(80.0)));
    }

    #[test]
    fn test_forget_removes_only_that_kind() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.record(1, CompletionFact::new(10, RequirementKind::MustView, now)).unwrap();
        store.record(1, CompletionFact::new(10, RequirementKind::MustSubmit, now)).unwrap();
        store.forget(1, 10, RequirementKind::MustView).unwrap();

        let facts = store.completions_for(1, &[10]).unwrap();
        assert_eq!(facts[&10].len(), 1);
        assert_eq!(facts[&10][0].kind, RequirementKind::MustSubmit);

        store.forget(1, 10, RequirementKind::MustSubmit).unwrap();
        assert!(store.completions_for(1, &[10]).unwrap().is_empty());
    }

    #[test]
    fn test_module_ids_sorted() {
        let store = MemoryStore::new();
        store.put_module(Module::new(3, "c")).unwrap();
        store.put_module(Module::new(1, "a")).unwrap();
        assert_eq!(store.module_ids().unwrap(), vec![1, 3]);
    }
}

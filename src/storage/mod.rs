//! Storage module for modprog
//!
//! Defines the `ProgressionStore` boundary the evaluator reads and writes
//! through, an in-memory implementation and a SQLite-backed one.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{CompletionFact, ItemId, LearnerId, Module, ModuleId, Progression};

pub mod course;
pub mod memory;
pub mod sqlite;

pub use course::{CourseDocument, FactRecord, ImportSummary};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreCounts};

/// Persistence boundary consumed by the evaluator.
///
/// Each call is assumed atomic on its own; the evaluator never spans a
/// transaction across modules.
pub trait ProgressionStore: Send + Sync {
    fn learner_exists(&self, learner_id: LearnerId) -> Result<bool>;

    /// Load the current definition of a module, `None` if unknown
    fn load_module(&self, module_id: ModuleId) -> Result<Option<Module>>;

    /// Every module id the store knows, in ascending order
    fn module_ids(&self) -> Result<Vec<ModuleId>>;

    /// Recorded facts for the given items, grouped by item. Items without
    /// facts are absent from the map.
    fn completions_for(
        &self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, Vec<CompletionFact>>>;

    fn load_progression(&self, learner_id: LearnerId, module_id: ModuleId) -> Result<Option<Progression>>;

    /// Last writer wins
    fn save_progression(&self, progression: &Progression) -> Result<()>;
}

impl<S: ProgressionStore + ?Sized> ProgressionStore for std::sync::Arc<S> {
    fn learner_exists(&self, learner_id: LearnerId) -> Result<bool> {
        (**self).learner_exists(learner_id)
    }

    fn load_module(&self, module_id: ModuleId) -> Result<Option<Module>> {
        (**self).load_module(module_id)
    }

    fn module_ids(&self) -> Result<Vec<ModuleId>> {
        (**self).module_ids()
    }

    fn completions_for(
        &self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, Vec<CompletionFact>>> {
        (**self).completions_for(learner_id, item_ids)
    }

    fn load_progression(&self, learner_id: LearnerId, module_id: ModuleId) -> Result<Option<Progression>> {
        (**self).load_progression(learner_id, module_id)
    }

    fn save_progression(&self, progression: &Progression) -> Result<()> {
        (**self).save_progression(progression)
    }
}

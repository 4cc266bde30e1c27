//! modprog - module progression engine
//!
//! Decides, per learner, whether each course module is locked, unlocked,
//! started or completed from its prerequisites, unlock date, sequential
//! progress setting and item completion requirements.
//!
//! ```no_run
//! use modprog::{MemoryStore, Module, Item, Requirement, ProgressionEvaluator};
//!
//! let store = MemoryStore::new();
//! store.add_learner(1).unwrap();
//! store
//!     .put_module(Module::new(10, "Intro").with_item(Item::new(100, 1).with_requirement(Requirement::MustView)))
//!     .unwrap();
//!
//! let evaluator = ProgressionEvaluator::new(store);
//! let progression = evaluator.evaluate(1, 10).unwrap();
//! println!("{}", progression.workflow_state);
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod storage;

pub use config::{Config, EvaluatorSettings};
pub use error::{ProgressionError, Result};
pub use evaluator::ProgressionEvaluator;
pub use model::{
    CompletionFact, IncompleteRequirement, Item, ItemId, LearnerId, Module, ModuleId, Progression, Requirement,
    RequirementKind, RequirementMet, WorkflowState,
};
pub use storage::{CourseDocument, MemoryStore, ProgressionStore, SqliteStore};

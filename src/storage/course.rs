//! Course document import
//!
//! A course document is a JSON bundle of learners, module definitions and
//! recorded completion facts, used to seed a store from outside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{CompletionFact, ItemId, LearnerId, Module, RequirementKind};

use super::SqliteStore;

/// A completion fact as it appears in a course document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRecord {
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    pub kind: RequirementKind,
    /// Defaults to the import time when omitted
    #[serde(default)]
    pub satisfied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl FactRecord {
    pub fn into_fact(self, now: DateTime<Utc>) -> CompletionFact {
        CompletionFact {
            item_id: self.item_id,
            kind: self.kind,
            satisfied_at: self.satisfied_at.unwrap_or(now),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseDocument {
    #[serde(default)]
    pub learners: Vec<LearnerId>,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub completions: Vec<FactRecord>,
}

/// Result of importing a course document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub learners: usize,
    pub modules: usize,
    pub completions: usize,
}

impl CourseDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document: CourseDocument = serde_json::from_str(&content)?;
        Ok(document)
    }

    /// Write every learner, module and fact into the store. Learners that
    /// only appear in completions are registered too.
    pub fn import_into(self, store: &SqliteStore) -> Result<ImportSummary> {
        let now = Utc::now();
        let mut learners: HashSet<LearnerId> = self.learners.iter().copied().collect();
        learners.extend(self.completions.iter().map(|fact| fact.learner_id));

        for learner_id in &learners {
            store.upsert_learner(*learner_id)?;
        }

        let mut item_owner: HashSet<ItemId> = HashSet::new();
        for module in &self.modules {
            for item in &module.items {
                if !item_owner.insert(item.id) {
                    warn!("Item {} appears in more than one module; last definition wins", item.id);
                }
            }
            store.upsert_module(module)?;
        }

        let completions = self.completions.len();
        for record in self.completions {
            let learner_id = record.learner_id;
            store.record_completion(learner_id, &record.into_fact(now))?;
        }

        let summary = ImportSummary {
            learners: learners.len(),
            modules: self.modules.len(),
            completions,
        };
        info!(
            "Imported {} learners, {} modules, {} completion facts",
            summary.learners, summary.modules, summary.completions
        );
        Ok(summary)
    }
}

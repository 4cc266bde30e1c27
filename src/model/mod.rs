//! Course structure as seen by the evaluator
//!
//! Modules and items are authored elsewhere; the evaluator only ever reads
//! an already-loaded, immutable view of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod progression;

pub use progression::{IncompleteRequirement, Progression, RequirementMet, WorkflowState};

pub type LearnerId = i64;
pub type ModuleId = i64;
pub type ItemId = i64;

/// Kind of a completion requirement, without its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    MustView,
    MustSubmit,
    MustContribute,
    MustMarkDone,
    MinScore,
}

impl RequirementKind {
    /// String representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::MustView => "must_view",
            RequirementKind::MustSubmit => "must_submit",
            RequirementKind::MustContribute => "must_contribute",
            RequirementKind::MustMarkDone => "must_mark_done",
            RequirementKind::MinScore => "min_score",
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequirementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "must_view" => Ok(RequirementKind::MustView),
            "must_submit" => Ok(RequirementKind::MustSubmit),
            "must_contribute" => Ok(RequirementKind::MustContribute),
            "must_mark_done" => Ok(RequirementKind::MustMarkDone),
            "min_score" => Ok(RequirementKind::MinScore),
            other => Err(format!("unknown requirement kind: {}", other)),
        }
    }
}

/// Completion requirement attached to an item
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    MustView,
    MustSubmit,
    MustContribute,
    MustMarkDone,
    /// Recorded score must be at least `threshold`
    MinScore { threshold: f64 },
}

impl Requirement {
    pub fn kind(&self) -> RequirementKind {
        match self {
            Requirement::MustView => RequirementKind::MustView,
            Requirement::MustSubmit => RequirementKind::MustSubmit,
            Requirement::MustContribute => RequirementKind::MustContribute,
            Requirement::MustMarkDone => RequirementKind::MustMarkDone,
            Requirement::MinScore { .. } => RequirementKind::MinScore,
        }
    }

    pub fn min_score(&self) -> Option<f64> {
        match self {
            Requirement::MinScore { threshold } => Some(*threshold),
            _ => None,
        }
    }

    /// Rebuild a requirement from its stored kind and optional threshold.
    /// A `min_score` row without a threshold is read as threshold 0.
    pub fn from_parts(kind: RequirementKind, threshold: Option<f64>) -> Self {
        match kind {
            RequirementKind::MustView => Requirement::MustView,
            RequirementKind::MustSubmit => Requirement::MustSubmit,
            RequirementKind::MustContribute => Requirement::MustContribute,
            RequirementKind::MustMarkDone => Requirement::MustMarkDone,
            RequirementKind::MinScore => Requirement::MinScore {
                threshold: threshold.unwrap_or(0.0),
            },
        }
    }
}

/// One piece of content inside a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub position: i64,
    #[serde(default)]
    pub requirement: Option<Requirement>,
    /// Underlying content is inaccessible to the learner regardless of module state
    #[serde(default)]
    pub content_locked: bool,
}

impl Item {
    pub fn new(id: ItemId, position: i64) -> Self {
        Self {
            id,
            position,
            requirement: None,
            content_locked: false,
        }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn locked_content(mut self) -> Self {
        self.content_locked = true;
        self
    }
}

/// An ordered container of items with optional gating rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub prerequisite_module_ids: Vec<ModuleId>,
    #[serde(default)]
    pub require_sequential_progress: bool,
    /// 0 means every requirement, N means any N requirements
    #[serde(default)]
    pub requirement_count: u32,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
}

impl Module {
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            items: Vec::new(),
            prerequisite_module_ids: Vec::new(),
            require_sequential_progress: false,
            requirement_count: 0,
            unlock_at: None,
        }
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_prerequisite(mut self, module_id: ModuleId) -> Self {
        self.prerequisite_module_ids.push(module_id);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.require_sequential_progress = true;
        self
    }

    pub fn requiring(mut self, count: u32) -> Self {
        self.requirement_count = count;
        self
    }

    pub fn unlocking_at(mut self, at: DateTime<Utc>) -> Self {
        self.unlock_at = Some(at);
        self
    }

    /// Items in evaluation order: by position, ties broken by id
    pub fn ordered_items(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.items.iter().collect();
        items.sort_by_key(|item| (item.position, item.id));
        items
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Items that carry a completion requirement, in evaluation order
    pub fn requirement_items(&self) -> Vec<(&Item, Requirement)> {
        self.ordered_items()
            .into_iter()
            .filter_map(|item| item.requirement.map(|req| (item, req)))
            .collect()
    }

    pub fn is_locked_until(&self, now: DateTime<Utc>) -> bool {
        matches!(self.unlock_at, Some(at) if at > now)
    }
}

/// Recorded learner activity against an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionFact {
    pub item_id: ItemId,
    pub kind: RequirementKind,
    pub satisfied_at: DateTime<Utc>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl CompletionFact {
    pub fn new(item_id: ItemId, kind: RequirementKind, satisfied_at: DateTime<Utc>) -> Self {
        Self {
            item_id,
            kind,
            satisfied_at,
            score: None,
        }
    }

    pub fn scored(item_id: ItemId, score: f64, satisfied_at: DateTime<Utc>) -> Self {
        Self {
            item_id,
            kind: RequirementKind::MinScore,
            satisfied_at,
            score: Some(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ordered_items_breaks_ties_by_id() {
        let module = Module::new(1, "Intro")
            .with_item(Item::new(30, 2))
            .with_item(Item::new(20, 1))
            .with_item(Item::new(10, 2));

        let order: Vec<ItemId> = module.ordered_items().iter().map(|i| i.id).collect();
        assert_eq!(order, vec![20, 10, 30]);
    }

    #[test]
    fn test_requirement_items_skips_plain_items() {
        let module = Module::new(1, "Intro")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MustView))
            .with_item(Item::new(2, 2))
            .with_item(Item::new(3, 3).with_requirement(Requirement::MinScore { threshold: 70.0 }));

        let kinds: Vec<RequirementKind> = module
            .requirement_items()
            .iter()
            .map(|(_, req)| req.kind())
            .collect();
        assert_eq!(kinds, vec![RequirementKind::MustView, RequirementKind::MinScore]);
    }

    #[test]
    fn test_requirement_kind_parse() {
        assert_eq!("must-view".parse::<RequirementKind>(), Ok(RequirementKind::MustView));
        assert_eq!("MIN_SCORE".parse::<RequirementKind>(), Ok(RequirementKind::MinScore));
        assert!("must_dance".parse::<RequirementKind>().is_err());
    }

    #[test]
    fn test_requirement_serde_tagging() {
        let json = serde_json::to_string(&Requirement::MinScore { threshold: 70.0 }).unwrap();
        assert_eq!(json, r#"{"type":"min_score","threshold":70.0}"#);

        let req: Requirement = serde_json::from_str(r#"{"type":"must_mark_done"}"#).unwrap();
        assert_eq!(req, Requirement::MustMarkDone);
    }

    #[test]
    fn test_unlock_at() {
        let now = Utc::now();
        let module = Module::new(1, "Later").unlocking_at(now + Duration::hours(1));
        assert!(module.is_locked_until(now));
        assert!(!module.is_locked_until(now + Duration::hours(2)));
        assert!(!Module::new(2, "Always").is_locked_until(now));
    }
}

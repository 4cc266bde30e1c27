//! Per-learner progression state of a module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::{ItemId, LearnerId, ModuleId, RequirementKind};

/// Workflow state of a module for one learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Locked,
    Unlocked,
    Started,
    Completed,
}

impl WorkflowState {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Locked => "locked",
            WorkflowState::Unlocked => "unlocked",
            WorkflowState::Started => "started",
            WorkflowState::Completed => "completed",
        }
    }

    /// Only `completed` satisfies a downstream prerequisite
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowState::Completed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "locked" => Ok(WorkflowState::Locked),
            "unlocked" => Ok(WorkflowState::Unlocked),
            "started" => Ok(WorkflowState::Started),
            "completed" => Ok(WorkflowState::Completed),
            other => Err(format!("unknown workflow state: {}", other)),
        }
    }
}

/// A satisfied (item, requirement) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequirementMet {
    pub item_id: ItemId,
    pub kind: RequirementKind,
}

/// A requirement the learner still has to satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteRequirement {
    pub item_id: ItemId,
    pub kind: RequirementKind,
    /// Threshold of a `min_score` requirement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Best score recorded so far, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    pub learner_id: LearnerId,
    pub module_id: ModuleId,
    pub workflow_state: WorkflowState,
    pub requirements_met: BTreeSet<RequirementMet>,
    #[serde(default)]
    pub incomplete_requirements: Vec<IncompleteRequirement>,
    /// Furthest sequentially unlocked position; `None` when unconstrained
    pub current_position: Option<i64>,
    /// UI display flag, never consulted for locking
    #[serde(default)]
    pub collapsed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Progression {
    /// A fresh, locked progression with nothing met
    pub fn locked(learner_id: LearnerId, module_id: ModuleId) -> Self {
        Self {
            learner_id,
            module_id,
            workflow_state: WorkflowState::Locked,
            requirements_met: BTreeSet::new(),
            incomplete_requirements: Vec::new(),
            current_position: None,
            collapsed: false,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.workflow_state.is_completed()
    }

    pub fn has_met(&self, item_id: ItemId, kind: RequirementKind) -> bool {
        self.requirements_met.contains(&RequirementMet { item_id, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_state_roundtrip_str() {
        for state in [
            WorkflowState::Locked,
            WorkflowState::Unlocked,
            WorkflowState::Started,
            WorkflowState::Completed,
        ] {
            assert_eq!(state.as_str().parse::<WorkflowState>(), Ok(state));
        }
        assert!("archived".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_only_completed_counts_for_prerequisites() {
        assert!(WorkflowState::Completed.is_completed());
        assert!(!WorkflowState::Started.is_completed());
        assert!(!WorkflowState::Unlocked.is_completed());
        assert!(!WorkflowState::Locked.is_completed());
    }

    #[test]
    fn test_progression_json_shape() {
        let mut progression = Progression::locked(7, 3);
        progression.requirements_met.insert(RequirementMet {
            item_id: 11,
            kind: RequirementKind::MustView,
        });

        let json = serde_json::to_value(&progression).unwrap();
        assert_eq!(json["workflow_state"], "locked");
        assert_eq!(json["requirements_met"][0]["kind"], "must_view");
        assert!(progression.has_met(11, RequirementKind::MustView));
    }
}

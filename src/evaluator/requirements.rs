//! Requirement assessment for a single unlocked module
//!
//! Pure functions over a module definition and the learner's recorded
//! facts. Nothing here touches the store.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::model::{
    CompletionFact, IncompleteRequirement, Item, ItemId, Module, Requirement, RequirementKind, RequirementMet,
};

/// What the learner has and has not satisfied in one module
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assessment {
    pub met: BTreeSet<RequirementMet>,
    pub incomplete: Vec<IncompleteRequirement>,
    pub current_position: Option<i64>,
    pub threshold_reached: bool,
}

/// Whether a single fact satisfies a requirement. A `min_score` fact
/// without a score, or below the threshold, never does.
pub(crate) fn fact_satisfies(requirement: &Requirement, fact: &CompletionFact) -> bool {
    if fact.kind != requirement.kind() {
        return false;
    }
    match requirement {
        Requirement::MinScore { threshold } => matches!(fact.score, Some(score) if score >= *threshold),
        _ => true,
    }
}

fn item_satisfied(item: &Item, requirement: &Requirement, facts: &HashMap<ItemId, Vec<CompletionFact>>) -> bool {
    let Some(item_facts) = facts.get(&item.id) else {
        return false;
    };
    if item.content_locked {
        debug!("Ignoring {} facts for content-locked item {}", item_facts.len(), item.id);
        return false;
    }
    item_facts.iter().any(|fact| {
        if fact.kind == RequirementKind::MinScore && fact.score.is_none() {
            debug!("min_score fact without a score for item {}", item.id);
        }
        fact_satisfies(requirement, fact)
    })
}

fn best_score(item: &Item, facts: &HashMap<ItemId, Vec<CompletionFact>>) -> Option<f64> {
    facts
        .get(&item.id)?
        .iter()
        .filter(|fact| fact.kind == RequirementKind::MinScore)
        .filter_map(|fact| fact.score)
        .fold(None, |best: Option<f64>, score| Some(best.map_or(score, |b| b.max(score))))
}

fn incomplete_for(item: &Item, requirement: &Requirement, score: Option<f64>) -> IncompleteRequirement {
    IncompleteRequirement {
        item_id: item.id,
        kind: requirement.kind(),
        min_score: requirement.min_score(),
        score,
    }
}

/// Number of met requirements needed to complete the module. A module
/// with no requirement-bearing items has nothing to meet.
pub(crate) fn required_count(module: &Module) -> usize {
    let with_requirement = module.items.iter().filter(|item| item.requirement.is_some()).count();
    match module.requirement_count {
        _ if with_requirement == 0 => 0,
        0 => with_requirement,
        n => n as usize,
    }
}

/// Assess an unlocked module against the learner's facts.
///
/// With sequential progress the learner sits on the first item whose
/// requirement is unmet; nothing after it can count as met.
pub(crate) fn assess(module: &Module, facts: &HashMap<ItemId, Vec<CompletionFact>>) -> Assessment {
    let ordered = module.ordered_items();

    let mut cutoff = ordered.len().saturating_sub(1);
    if module.require_sequential_progress {
        if let Some(idx) = ordered.iter().position(|item| {
            item.requirement
                .map(|req| !item_satisfied(item, &req, facts))
                .unwrap_or(false)
        }) {
            cutoff = idx;
        }
    }

    let current_position = if module.require_sequential_progress {
        ordered.get(cutoff).map(|item| item.position)
    } else {
        None
    };

    let mut met = BTreeSet::new();
    let mut incomplete = Vec::new();
    for (idx, item) in ordered.iter().enumerate() {
        let Some(requirement) = item.requirement else {
            continue;
        };
        if idx <= cutoff && item_satisfied(item, &requirement, facts) {
            met.insert(RequirementMet {
                item_id: item.id,
                kind: requirement.kind(),
            });
        } else {
            incomplete.push(incomplete_for(item, &requirement, best_score(item, facts)));
        }
    }

    let threshold_reached = met.len() >= required_count(module);

    Assessment {
        met,
        incomplete,
        current_position,
        threshold_reached,
    }
}

/// Every requirement outstanding, as reported for a locked module
pub(crate) fn all_outstanding(module: &Module) -> Vec<IncompleteRequirement> {
    module
        .requirement_items()
        .into_iter()
        .map(|(item, requirement)| incomplete_for(item, &requirement, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn facts(list: Vec<CompletionFact>) -> HashMap<ItemId, Vec<CompletionFact>> {
        let mut grouped: HashMap<ItemId, Vec<CompletionFact>> = HashMap::new();
        for fact in list {
            grouped.entry(fact.item_id).or_default().push(fact);
        }
        grouped
    }

    fn viewed(item_id: ItemId) -> CompletionFact {
        CompletionFact::new(item_id, RequirementKind::MustView, Utc::now())
    }

    #[test]
    fn test_min_score_threshold() {
        let req = Requirement::MinScore { threshold: 70.0 };
        let now = Utc::now();
        assert!(!fact_satisfies(&req, &CompletionFact::scored(1, 69.9, now)));
        assert!(fact_satisfies(&req, &CompletionFact::scored(1, 70.0, now)));

        let mut unscored = CompletionFact::scored(1, 0.0, now);
        unscored.score = None;
        assert!(!fact_satisfies(&req, &unscored));
    }

    #[test]
    fn test_kind_must_match() {
        assert!(!fact_satisfies(&Requirement::MustSubmit, &viewed(1)));
        assert!(fact_satisfies(&Requirement::MustView, &viewed(1)));
    }

    #[test]
    fn test_sequential_cutoff_ignores_later_facts() {
        let module = Module::new(1, "Seq")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MustView))
            .with_item(Item::new(2, 2).with_requirement(Requirement::MustView))
            .with_item(Item::new(3, 3).with_requirement(Requirement::MustView))
            .sequential();

        let assessment = assess(&module, &facts(vec![viewed(1), viewed(3)]));
        assert_eq!(assessment.current_position, Some(2));
        assert_eq!(assessment.met.len(), 1);
        assert_eq!(assessment.incomplete.len(), 2);
        assert!(!assessment.threshold_reached);
    }

    #[test]
    fn test_sequential_all_met_sits_on_last_item() {
        let module = Module::new(1, "Seq")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MustView))
            .with_item(Item::new(2, 5))
            .sequential();

        let assessment = assess(&module, &facts(vec![viewed(1)]));
        assert_eq!(assessment.current_position, Some(5));
        assert!(assessment.threshold_reached);
    }

    #[test]
    fn test_content_locked_never_counts() {
        let module = Module::new(1, "Locked content")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MustView).locked_content());

        let assessment = assess(&module, &facts(vec![viewed(1)]));
        assert!(assessment.met.is_empty());
        assert!(!assessment.threshold_reached);
    }

    #[test]
    fn test_incomplete_reports_best_score() {
        let now = Utc::now();
        let module = Module::new(1, "Quiz")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MinScore { threshold: 70.0 }));

        let assessment = assess(
            &module,
            &facts(vec![CompletionFact::scored(1, 40.0, now), CompletionFact::scored(1, 65.0, now)]),
        );
        assert_eq!(
            assessment.incomplete,
            vec![IncompleteRequirement {
                item_id: 1,
                kind: RequirementKind::MinScore,
                min_score: Some(70.0),
                score: Some(65.0),
            }]
        );
    }

    #[test]
    fn test_required_count_is_not_capped_by_items() {
        let module = Module::new(1, "Any")
            .with_item(Item::new(1, 1).with_requirement(Requirement::MustView))
            .with_item(Item::new(2, 2))
            .requiring(3);
        assert_eq!(required_count(&module), 3);

        let assessment = assess(&module, &facts(vec![viewed(1)]));
        assert_eq!(assessment.met.len(), 1);
        assert!(!assessment.threshold_reached);

        assert_eq!(required_count(&Module::new(2, "Empty").requiring(2)), 0);
    }
}

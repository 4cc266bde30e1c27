//! Progression evaluator
//!
//! Computes, per learner, whether each module is locked, unlocked, started
//! or completed, and which requirements are met or outstanding.
//!
//! ## Evaluation
//! 1. Prerequisites are evaluated first and memoized for the whole call.
//!    A module already on the evaluation stack counts as not completed,
//!    which breaks prerequisite cycles.
//! 2. An unmet prerequisite or a future `unlock_at` locks the module.
//! 3. Otherwise the learner's facts are assessed against the module's
//!    current items and the requirement count.
//! 4. `completed` is sticky: later loss of facts does not revert it, only
//!    a re-lock does.
//! 5. Every evaluated progression is saved through the store.

mod graph;
mod requirements;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::EvaluatorSettings;
use crate::error::{ProgressionError, Result};
use crate::model::{LearnerId, Module, ModuleId, Progression, WorkflowState};
use crate::storage::ProgressionStore;

/// State shared by every module evaluated in one call
struct Session {
    learner_id: LearnerId,
    now: DateTime<Utc>,
    modules: HashMap<ModuleId, Module>,
    results: Mutex<HashMap<ModuleId, Progression>>,
    max_depth: usize,
}

impl Session {
    fn results(&self) -> Result<MutexGuard<'_, HashMap<ModuleId, Progression>>> {
        self.results
            .lock()
            .map_err(|e| ProgressionError::Poisoned(format!("evaluation memo: {:?}", e)))
    }

    fn memoized_state(&self, module_id: ModuleId) -> Result<Option<WorkflowState>> {
        Ok(self.results()?.get(&module_id).map(|p| p.workflow_state))
    }
}

pub struct ProgressionEvaluator<S: ProgressionStore> {
    store: S,
    settings: EvaluatorSettings,
}

impl<S: ProgressionStore> ProgressionEvaluator<S> {
    pub fn new(store: S) -> Self {
        Self::with_settings(store, EvaluatorSettings::default())
    }

    pub fn with_settings(store: S, settings: EvaluatorSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate one module for a learner as of now
    pub fn evaluate(&self, learner_id: LearnerId, module_id: ModuleId) -> Result<Progression> {
        self.evaluate_at(learner_id, module_id, Utc::now())
    }

    pub fn evaluate_at(&self, learner_id: LearnerId, module_id: ModuleId, now: DateTime<Utc>) -> Result<Progression> {
        let mut results = self.evaluate_all_at(learner_id, &[module_id], now)?;
        results
            .remove(&module_id)
            .ok_or_else(|| ProgressionError::module_not_found(module_id))
    }

    /// Evaluate several modules for a learner as of now
    pub fn evaluate_all(&self, learner_id: LearnerId, module_ids: &[ModuleId]) -> Result<BTreeMap<ModuleId, Progression>> {
        self.evaluate_all_at(learner_id, module_ids, Utc::now())
    }

    /// Evaluate every module the store knows for a learner
    pub fn evaluate_course(&self, learner_id: LearnerId) -> Result<BTreeMap<ModuleId, Progression>> {
        let module_ids = self.store.module_ids()?;
        self.evaluate_all(learner_id, &module_ids)
    }

    pub fn evaluate_all_at(
        &self,
        learner_id: LearnerId,
        module_ids: &[ModuleId],
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<ModuleId, Progression>> {
        if !self.store.learner_exists(learner_id)? {
            return Err(ProgressionError::learner_not_found(learner_id));
        }

        let modules = self.load_closure(module_ids)?;
        let max_depth = self.settings.max_prerequisite_depth.unwrap_or(modules.len()).max(1);
        let session = Session {
            learner_id,
            now,
            modules,
            results: Mutex::new(HashMap::new()),
            max_depth,
        };

        let order = graph::layers(&session.modules);
        debug!(
            "Evaluating {} modules for learner {} in {} layers ({} on cycles)",
            session.modules.len(),
            learner_id,
            order.layers.len(),
            order.cyclic.len()
        );

        for layer in &order.layers {
            if self.settings.parallel && layer.len() > 1 {
                layer
                    .par_iter()
                    .map(|id| self.resolve(&session, *id, &mut Vec::new()))
                    .collect::<Result<Vec<_>>>()?;
            } else {
                for id in layer {
                    self.resolve(&session, *id, &mut Vec::new())?;
                }
            }
        }

        if !order.cyclic.is_empty() {
            warn!(
                "Malformed prerequisite graph: modules {:?} are on or behind a cycle",
                order.cyclic
            );
            for id in &order.cyclic {
                self.resolve(&session, *id, &mut Vec::new())?;
            }
        }

        let results = session.results()?;
        let mut evaluated = BTreeMap::new();
        for id in module_ids {
            let progression = results
                .get(id)
                .cloned()
                .ok_or_else(|| ProgressionError::module_not_found(*id))?;
            evaluated.insert(*id, progression);
        }
        Ok(evaluated)
    }

    /// Load the requested modules and every module they transitively
    /// depend on. Unknown requested ids fail; unknown prerequisites are
    /// dropped from the graph.
    fn load_closure(&self, module_ids: &[ModuleId]) -> Result<HashMap<ModuleId, Module>> {
        let mut modules = HashMap::new();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();

        for id in module_ids {
            let module = self
                .store
                .load_module(*id)?
                .ok_or_else(|| ProgressionError::module_not_found(*id))?;
            queue.extend(module.prerequisite_module_ids.iter().copied());
            modules.insert(*id, module);
        }

        let mut missing = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if modules.contains_key(&id) || missing.contains(&id) {
                continue;
            }
            match self.store.load_module(id)? {
                Some(module) => {
                    queue.extend(module.prerequisite_module_ids.iter().copied());
                    modules.insert(id, module);
                }
                None => {
                    warn!("Prerequisite module {} does not exist; ignoring it", id);
                    missing.insert(id);
                }
            }
        }

        Ok(modules)
    }

    /// Evaluate a module after its prerequisites, returning its state
    fn resolve(&self, session: &Session, module_id: ModuleId, stack: &mut Vec<ModuleId>) -> Result<WorkflowState> {
        if let Some(state) = session.memoized_state(module_id)? {
            return Ok(state);
        }
        if stack.contains(&module_id) {
            warn!(
                "Prerequisite cycle through module {} (path {:?}); treating it as not completed",
                module_id, stack
            );
            return Ok(WorkflowState::Locked);
        }
        if stack.len() >= session.max_depth {
            warn!(
                "Prerequisite chain deeper than {} at module {}; treating it as not completed",
                session.max_depth, module_id
            );
            return Ok(WorkflowState::Locked);
        }
        let Some(module) = session.modules.get(&module_id) else {
            return Ok(WorkflowState::Locked);
        };

        stack.push(module_id);
        let mut prerequisites_met = true;
        for prerequisite in &module.prerequisite_module_ids {
            if !session.modules.contains_key(prerequisite) {
                continue;
            }
            if !self.resolve(session, *prerequisite, stack)?.is_completed() {
                prerequisites_met = false;
            }
        }
        stack.pop();

        let progression = self.compute(session, module, prerequisites_met)?;
        let state = progression.workflow_state;
        self.store.save_progression(&progression)?;
        debug!(
            "Module {} for learner {}: {} ({} requirements met)",
            module_id,
            session.learner_id,
            state,
            progression.requirements_met.len()
        );
        session.results()?.insert(module_id, progression);
        Ok(state)
    }

    fn compute(&self, session: &Session, module: &Module, prerequisites_met: bool) -> Result<Progression> {
        let prior = self.store.load_progression(session.learner_id, module.id)?;
        let was_completed = prior.as_ref().map_or(false, |p| p.is_completed());

        let mut progression = Progression::locked(session.learner_id, module.id);
        progression.collapsed = prior.as_ref().map_or(false, |p| p.collapsed);

        if !prerequisites_met || module.is_locked_until(session.now) {
            if was_completed {
                info!(
                    "Re-locking completed module {} for learner {}",
                    module.id, session.learner_id
                );
            }
            progression.incomplete_requirements = requirements::all_outstanding(module);
            progression.current_position = if module.require_sequential_progress {
                module.ordered_items().first().map(|item| item.position)
            } else {
                None
            };
            return Ok(progression);
        }

        let facts = self.store.completions_for(session.learner_id, &module.item_ids())?;
        let assessment = requirements::assess(module, &facts);
        progression.current_position = assessment.current_position;
        progression.requirements_met = assessment.met;

        let completed = assessment.threshold_reached || was_completed;
        if let (true, Some(prior)) = (was_completed, prior.as_ref()) {
            // keep what was met before, restricted to the module's current requirements
            let current = module.requirement_items();
            progression.requirements_met.extend(prior.requirements_met.iter().filter(|met| {
                current
                    .iter()
                    .any(|(item, req)| item.id == met.item_id && req.kind() == met.kind)
            }));

            // kept pairs may sit past the fresh cutoff; move the position up to them
            if module.require_sequential_progress {
                let furthest_met = current
                    .iter()
                    .filter(|(item, _)| progression.requirements_met.iter().any(|m| m.item_id == item.id))
                    .map(|(item, _)| item.position)
                    .max();
                progression.current_position = progression.current_position.max(furthest_met);
            }
        }

        let met = &progression.requirements_met;
        progression.incomplete_requirements = assessment
            .incomplete
            .into_iter()
            .filter(|req| !met.iter().any(|m| m.item_id == req.item_id && m.kind == req.kind))
            .collect();

        progression.workflow_state = if completed {
            WorkflowState::Completed
        } else if !progression.requirements_met.is_empty() {
            WorkflowState::Started
        } else {
            WorkflowState::Unlocked
        };

        progression.completed_at = match (&progression.workflow_state, prior.and_then(|p| p.completed_at)) {
            (WorkflowState::Completed, Some(at)) if was_completed => Some(at),
            (WorkflowState::Completed, _) => Some(session.now),
            _ => None,
        };

        Ok(progression)
    }
}

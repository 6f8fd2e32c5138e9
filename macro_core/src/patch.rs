//! Patch building: turning a matched action into set-level patches.
//!
//! The builder is a pure function of the action, the fetched exercise
//! instances and the RPE lookup. It never emits a patch without changes.

use crate::catalog::CatalogIndex;
use crate::condition::EQ_EPSILON;
use crate::config::PatchingConfig;
use crate::rpe::RpeLookup;
use crate::types::{
    Action, ActionType, AdjustMode, ExerciseInstance, Patch, PatchChanges, SetAction, SetRecord,
    Trigger,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Which exercises of a workout an action addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExerciseScope {
    All,
    Only(BTreeSet<i64>),
}

impl ExerciseScope {
    /// Explicit target ids, then the tag selector, then the trigger's
    /// exercises, then every exercise in the workout
    pub fn resolve(action: &Action, trigger: &Trigger, catalog: Option<&CatalogIndex>) -> Self {
        if let Some(target) = &action.target {
            if let Some(ids) = &target.exercise_ids {
                return ExerciseScope::Only(ids.iter().copied().collect());
            }
            if let Some(selector) = &target.selector {
                let ids = catalog.map(|c| c.resolve(selector)).unwrap_or_default();
                if ids.is_empty() {
                    tracing::debug!("Selector {:?} matched no exercises", selector.value);
                }
                return ExerciseScope::Only(ids);
            }
        }
        match &trigger.exercise_ids {
            Some(ids) => ExerciseScope::Only(ids.iter().copied().collect()),
            None => ExerciseScope::All,
        }
    }

    pub fn includes(&self, exercise_id: i64) -> bool {
        match self {
            ExerciseScope::All => true,
            ExerciseScope::Only(ids) => ids.contains(&exercise_id),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn differs(old: Option<f64>, new: f64) -> bool {
    old.map_or(true, |o| (o - new).abs() > EQ_EPSILON)
}

/// Builds patches for one action against fetched exercise instances
pub struct PatchBuilder<'a> {
    rpe: &'a dyn RpeLookup,
    settings: &'a PatchingConfig,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(rpe: &'a dyn RpeLookup, settings: &'a PatchingConfig) -> Self {
        Self { rpe, settings }
    }

    /// Patches for every addressed exercise instance of one matched workout
    pub fn build(
        &self,
        action: &Action,
        scope: &ExerciseScope,
        instances: &[ExerciseInstance],
    ) -> Vec<Patch> {
        let Some(mode) = action.params.mode else {
            tracing::debug!("{:?} without mode emits nothing", action.kind);
            return Vec::new();
        };
        let Some(value) = action.params.value.filter(|v| v.is_finite()) else {
            tracing::debug!("{:?} without a finite value emits nothing", action.kind);
            return Vec::new();
        };

        let mut patches = Vec::new();
        for instance in instances.iter().filter(|i| scope.includes(i.exercise_id)) {
            match (action.kind, mode) {
                (ActionType::AdjustSets, AdjustMode::ByValue) => {
                    patches.extend(self.adjust_sets(instance, value));
                }
                (ActionType::AdjustLoad, _) | (ActionType::AdjustReps, _) => {
                    for set in &instance.sets {
                        let Some(set_id) = set.id() else {
                            continue;
                        };
                        let changes = self.field_changes(action.kind, mode, value, set);
                        if changes.is_empty() {
                            continue;
                        }
                        patches.push(Patch {
                            workout_id: instance.workout_id,
                            exercise_id: instance.exercise_id,
                            set_id: Some(set_id),
                            changes: PatchChanges::Fields(changes),
                        });
                    }
                }
                (kind, mode) => {
                    tracing::debug!("No patch rule for {:?}/{:?}", kind, mode);
                }
            }
        }
        patches
    }

    fn field_changes(
        &self,
        kind: ActionType,
        mode: AdjustMode,
        value: f64,
        set: &SetRecord,
    ) -> BTreeMap<String, Value> {
        let ceiling = self.settings.intensity_ceiling;
        let min_reps = self.settings.min_reps;
        let old_intensity = set.number(SetRecord::INTENSITY);
        let old_reps = set.number(SetRecord::REPS);
        let mut changes = BTreeMap::new();

        match (kind, mode) {
            (ActionType::AdjustLoad, AdjustMode::ByPercent) => {
                let factor = 1.0 + value / 100.0;
                if let Some(old) = old_intensity {
                    let new = round2((old * factor).clamp(0.0, ceiling));
                    if differs(Some(old), new) {
                        changes.insert(SetRecord::INTENSITY.to_string(), json!(new));
                    }
                }
                if let Some(old) = set.number(SetRecord::WEIGHT) {
                    let new = round2((old * factor).max(0.0));
                    if new.is_finite() && differs(Some(old), new) {
                        changes.insert(SetRecord::WEIGHT.to_string(), json!(new));
                    }
                }
            }
            (ActionType::AdjustLoad, AdjustMode::ToTarget) => {
                let target = old_reps.and_then(|reps| self.rpe.intensity_for(reps, value));
                if let Some(pct) = target {
                    let new = round2(pct.clamp(0.0, ceiling));
                    if differs(old_intensity, new) {
                        changes.insert(SetRecord::INTENSITY.to_string(), json!(new));
                    }
                }
            }
            (ActionType::AdjustReps, AdjustMode::ByValue) => {
                if let Some(old) = old_reps.filter(|old| (old + value).is_finite()) {
                    let new = ((old + value).round() as i64).max(min_reps);
                    if differs(Some(old), new as f64) {
                        changes.insert(SetRecord::REPS.to_string(), json!(new));
                    }
                }
            }
            (ActionType::AdjustReps, AdjustMode::ToTarget) => {
                let target = old_intensity.and_then(|pct| self.rpe.reps_for(pct, value));
                if let Some(reps) = target {
                    let new = (reps.round() as i64).max(min_reps);
                    if differs(old_reps, new as f64) {
                        changes.insert(SetRecord::REPS.to_string(), json!(new));
                    }
                }
            }
            _ => {}
        }

        changes
    }

    fn adjust_sets(&self, instance: &ExerciseInstance, value: f64) -> Vec<Patch> {
        let cap = self.settings.max_set_delta;
        if value.abs() > f64::from(cap) {
            tracing::warn!(
                "Adjust_Sets value {} exceeds the limit of {} sets, ignoring",
                value,
                cap
            );
            return Vec::new();
        }
        let delta = value.round() as i64;

        if delta > 0 {
            let Some(last) = instance.sets.last() else {
                tracing::debug!(
                    "Exercise {} in workout {} has no set to clone",
                    instance.exercise_id,
                    instance.workout_id
                );
                return Vec::new();
            };
            let template = last.without_id();
            (0..delta)
                .map(|_| Patch {
                    workout_id: instance.workout_id,
                    exercise_id: instance.exercise_id,
                    set_id: None,
                    changes: PatchChanges::Structural(SetAction::AddSet {
                        template: template.clone(),
                    }),
                })
                .collect()
        } else if delta < 0 {
            instance
                .sets
                .iter()
                .rev()
                .filter_map(SetRecord::id)
                .take(delta.unsigned_abs() as usize)
                .map(|set_id| Patch {
                    workout_id: instance.workout_id,
                    exercise_id: instance.exercise_id,
                    set_id: Some(set_id),
                    changes: PatchChanges::Structural(SetAction::RemoveSet),
                })
                .collect()
        } else {
            Vec::new()
        }
    }
}

//! Applying a preview to the downstream stores.
//!
//! Plan changes run first, since they may recreate or renumber workouts.
//! Patches are then grouped per (workout, exercise); each group is
//! re-read, merged and written back as one full set list. Groups are
//! independent: a failed group is reported and never blocks the others.

use crate::providers::{InstanceStore, PlanEditor};
use crate::types::{
    ApplyDetail, ApplyReport, Patch, PatchChanges, PreviewEntry, SetAction, SetRecord,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

enum GroupOutcome {
    Written(ApplyDetail),
    Unchanged,
    Missing,
    Failed(String),
}

/// Merge patches onto a set list, in order
///
/// `add_set` appends the template, `remove_set` drops the set with that id,
/// field patches overwrite only the fields they name. Patches addressing a
/// set that no longer exists are ignored.
pub fn merge_patches(current: &[SetRecord], patches: &[&Patch]) -> Vec<SetRecord> {
    let mut sets = current.to_vec();

    for patch in patches {
        match (&patch.changes, patch.set_id) {
            (PatchChanges::Structural(SetAction::AddSet { template }), _) => {
                sets.push(template.clone());
            }
            (PatchChanges::Structural(SetAction::RemoveSet), Some(set_id)) => {
                sets.retain(|s| s.id() != Some(set_id));
            }
            (PatchChanges::Fields(fields), Some(set_id)) => {
                if let Some(set) = sets.iter_mut().find(|s| s.id() == Some(set_id)) {
                    for (field, value) in fields {
                        set.set(field, value.clone());
                    }
                }
            }
            (_, None) => {
                tracing::warn!(
                    "Patch for exercise {} in workout {} has no set id, ignoring",
                    patch.exercise_id,
                    patch.workout_id
                );
            }
        }
    }

    sets
}

/// Executes previews against the instance store and plan editor
pub struct MacroApplier {
    instances: Arc<dyn InstanceStore>,
    editor: Arc<dyn PlanEditor>,
}

impl MacroApplier {
    pub fn new(instances: Arc<dyn InstanceStore>, editor: Arc<dyn PlanEditor>) -> Self {
        Self { instances, editor }
    }

    /// Apply every plan change, then every patch, of a preview
    ///
    /// Never fails: problems are collected into `errors`.
    pub async fn apply(&self, preview: &[PreviewEntry]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for change in preview.iter().flat_map(|entry| &entry.plan_changes) {
            match self.editor.execute(change).await {
                Ok(()) => report.plan_changes_applied += 1,
                Err(e) => {
                    tracing::warn!("Plan change from macro {} failed: {}", change.macro_id, e);
                    report
                        .errors
                        .push(format!("plan change from macro {}: {}", change.macro_id, e));
                }
            }
        }

        let patches: Vec<&Patch> = preview.iter().flat_map(|entry| &entry.patches).collect();
        let patch_report = self.apply_patches(&patches).await;
        report.applied = patch_report.applied;
        report.details = patch_report.details;
        report.errors.extend(patch_report.errors);

        tracing::info!(
            "Applied {} groups and {} plan changes ({} errors)",
            report.applied,
            report.plan_changes_applied,
            report.errors.len()
        );
        report
    }

    /// Apply patches grouped per (workout, exercise), groups concurrently
    pub async fn apply_patches(&self, patches: &[&Patch]) -> ApplyReport {
        let mut groups: BTreeMap<(i64, i64), Vec<&Patch>> = BTreeMap::new();
        for patch in patches {
            groups
                .entry((patch.workout_id, patch.exercise_id))
                .or_default()
                .push(patch);
        }

        let outcomes = join_all(groups.iter().map(|(&(workout_id, exercise_id), group)| {
            self.apply_group(workout_id, exercise_id, group)
        }))
        .await;

        let mut report = ApplyReport::default();
        for outcome in outcomes {
            match outcome {
                GroupOutcome::Written(detail) => {
                    report.applied += 1;
                    report.details.push(detail);
                }
                GroupOutcome::Unchanged | GroupOutcome::Missing => {}
                GroupOutcome::Failed(message) => report.errors.push(message),
            }
        }
        report
    }

    async fn apply_group(
        &self,
        workout_id: i64,
        exercise_id: i64,
        patches: &[&Patch],
    ) -> GroupOutcome {
        let instances = match self.instances.exercise_instances(workout_id).await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!("Fetching instances for workout {} failed: {}", workout_id, e);
                return GroupOutcome::Failed(format!(
                    "workout {} exercise {}: fetch failed: {}",
                    workout_id, exercise_id, e
                ));
            }
        };

        let Some(instance) = instances.into_iter().find(|i| i.exercise_id == exercise_id) else {
            tracing::info!(
                "No instance for exercise {} in workout {}, skipping",
                exercise_id,
                workout_id
            );
            return GroupOutcome::Missing;
        };

        let merged = merge_patches(&instance.sets, patches);
        if merged == instance.sets {
            tracing::debug!(
                "No net change for exercise {} in workout {}",
                exercise_id,
                workout_id
            );
            return GroupOutcome::Unchanged;
        }

        match self.instances.write_sets(workout_id, exercise_id, &merged).await {
            Ok(()) => {
                tracing::debug!(
                    "Wrote {} sets for exercise {} in workout {}",
                    merged.len(),
                    exercise_id,
                    workout_id
                );
                GroupOutcome::Written(ApplyDetail {
                    workout_id,
                    exercise_id,
                    sets_count: merged.len(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    "Writing exercise {} in workout {} failed: {}",
                    exercise_id,
                    workout_id,
                    e
                );
                GroupOutcome::Failed(format!(
                    "workout {} exercise {}: write failed: {}",
                    workout_id, exercise_id, e
                ))
            }
        }
    }
}

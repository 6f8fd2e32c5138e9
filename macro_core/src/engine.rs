//! Rule engine: evaluates a plan's macros and builds the preview.
//!
//! One `run` loads the active rules in (priority, id) order, fetches every
//! workout detail and exercise instance those rules can touch in one
//! concurrent pass, then evaluates each rule against that immutable
//! snapshot. Nothing is kept between runs.
//!
//! Only a missing applied plan fails a run. Malformed rules, unsupported
//! metrics, missing data and failed fetches all degrade to "no match" for
//! the rule involved.

use crate::applier::MacroApplier;
use crate::catalog::CatalogIndex;
use crate::condition::{evaluate_set_run, evaluate_value, evaluate_window};
use crate::config::Config;
use crate::patch::{ExerciseScope, PatchBuilder};
use crate::plan_change::build_plan_changes;
use crate::providers::{CatalogSource, InstanceStore, MetricProvider, PlanEditor, PlanStore};
use crate::rpe::{RpeChart, RpeLookup};
use crate::selector::WorkoutSelector;
use crate::trigger::TriggerEvaluator;
use crate::types::{
    sort_for_evaluation, ActionType, AppliedPlan, ApplyReport, ExerciseInstance, MacroRule, Metric,
    Op, PreviewEntry, RuleBody, RuleStatus, RunOptions, RunReport, WorkoutDetail,
};
use crate::{Error, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Everything fetched for one run, read-only once built
#[derive(Default)]
struct Snapshot {
    details: HashMap<i64, WorkoutDetail>,
    instances: HashMap<i64, Vec<ExerciseInstance>>,
    catalog: Option<CatalogIndex>,
}

impl Snapshot {
    fn detail(&self, workout_id: i64) -> Option<&WorkoutDetail> {
        self.details.get(&workout_id)
    }

    fn instances(&self, workout_id: i64) -> &[ExerciseInstance] {
        self.instances
            .get(&workout_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// A parsed rule with the workouts it reads and may change
struct Selection<'r> {
    rule: &'r MacroRule,
    body: &'r RuleBody,
    targets: Vec<i64>,
    /// Workouts before the anchor, `None` when too few exist
    window: Option<Vec<i64>>,
}

fn needs_catalog(body: &RuleBody) -> bool {
    body.action
        .target
        .as_ref()
        .is_some_and(|t| t.exercise_ids.is_none() && t.selector.is_some())
}

/// Evaluates macros for applied plans
pub struct MacroEngine {
    plans: Arc<dyn PlanStore>,
    metrics: Arc<dyn MetricProvider>,
    instances: Arc<dyn InstanceStore>,
    catalog: Arc<dyn CatalogSource>,
    editor: Arc<dyn PlanEditor>,
    rpe: Arc<dyn RpeLookup>,
    config: Config,
}

impl MacroEngine {
    pub fn new(
        plans: Arc<dyn PlanStore>,
        metrics: Arc<dyn MetricProvider>,
        instances: Arc<dyn InstanceStore>,
        catalog: Arc<dyn CatalogSource>,
        editor: Arc<dyn PlanEditor>,
        config: Config,
    ) -> Self {
        Self {
            plans,
            metrics,
            instances,
            catalog,
            editor,
            rpe: Arc::new(RpeChart::standard().clone()),
            config,
        }
    }

    /// Engine over a single backend serving every collaborator role
    pub fn with_backend<B>(backend: Arc<B>, config: Config) -> Self
    where
        B: PlanStore + MetricProvider + InstanceStore + CatalogSource + PlanEditor + 'static,
    {
        Self::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend,
            config,
        )
    }

    /// Replace the built-in RPE chart
    pub fn with_rpe(mut self, rpe: Arc<dyn RpeLookup>) -> Self {
        self.rpe = rpe;
        self
    }

    /// Evaluate every active macro and return the preview
    ///
    /// With `options.apply` the preview is applied right away and the
    /// apply report embedded in the result.
    pub async fn run(&self, applied_plan_id: i64, options: RunOptions) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("macro_run", %run_id, applied_plan_id);
        self.run_inner(run_id, applied_plan_id, options)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        applied_plan_id: i64,
        options: RunOptions,
    ) -> Result<RunReport> {
        let plan = self.load_plan(applied_plan_id).await?;
        let rules = self.active_rules(&plan).await;
        let selector = WorkoutSelector::new(&plan, options.anchor, options.index_offset);
        tracing::info!(
            "Evaluating {} macros for applied plan {} (cursor {}, {:?} anchor at {})",
            rules.len(),
            plan.id,
            plan.current_workout_index,
            options.anchor,
            selector.anchor()
        );

        let selections: Vec<Selection> = rules
            .iter()
            .map(|(rule, body)| {
                let targets = selector
                    .targets(body.duration.count)
                    .iter()
                    .map(|w| w.id)
                    .collect();
                let window = if body.condition.op.is_window() {
                    selector
                        .window(body.condition.n.unwrap_or(0))
                        .map(|ws| ws.iter().map(|w| w.id).collect())
                } else {
                    None
                };
                Selection {
                    rule,
                    body,
                    targets,
                    window,
                }
            })
            .collect();

        let snapshot = self.fetch(&selections).await;

        let preview: Vec<PreviewEntry> = selections
            .iter()
            .map(|selection| self.evaluate(plan.id, selection, &snapshot))
            .collect();

        let mut report = RunReport {
            run_id,
            applied_plan_id: plan.id,
            generated_at: Utc::now(),
            macros_evaluated: preview.len(),
            actions_applied: 0,
            preview,
            apply: None,
        };

        if options.apply {
            let applied = self.apply(&report.preview).await;
            report.actions_applied = applied.applied;
            report.apply = Some(applied);
        }

        tracing::info!(
            "Run complete: {} macros evaluated, {} actions applied",
            report.macros_evaluated,
            report.actions_applied
        );
        Ok(report)
    }

    /// Execute a preview: plan changes first, then patches
    pub async fn apply(&self, preview: &[PreviewEntry]) -> ApplyReport {
        MacroApplier::new(self.instances.clone(), self.editor.clone())
            .apply(preview)
            .await
    }

    /// The plan's macros in evaluation order with their parse status
    pub async fn rules(&self, applied_plan_id: i64) -> Result<Vec<RuleStatus>> {
        let plan = self.load_plan(applied_plan_id).await?;
        let mut rules = self.plans.macros(plan.plan_id).await?;
        sort_for_evaluation(&mut rules);

        Ok(rules
            .into_iter()
            .map(|rule| RuleStatus {
                error: rule.parse_body().err().map(|e| e.to_string()),
                id: rule.id,
                name: rule.name,
                priority: rule.priority,
                is_active: rule.is_active,
            })
            .collect())
    }

    async fn load_plan(&self, applied_plan_id: i64) -> Result<AppliedPlan> {
        self.plans
            .applied_plan(applied_plan_id)
            .await?
            .ok_or(Error::PlanNotFound(applied_plan_id))
    }

    /// Active, well-formed rules in evaluation order
    async fn active_rules(&self, plan: &AppliedPlan) -> Vec<(MacroRule, RuleBody)> {
        let mut rules = match self.plans.macros(plan.plan_id).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Loading macros for plan {} failed: {}", plan.plan_id, e);
                Vec::new()
            }
        };
        rules.retain(|r| r.is_active);
        sort_for_evaluation(&mut rules);

        rules
            .into_iter()
            .filter_map(|rule| match rule.parse_body() {
                Ok(body) => Some((rule, body)),
                Err(e) => {
                    tracing::warn!("Skipping macro {}: {}", rule.id, e);
                    None
                }
            })
            .collect()
    }

    /// Fetch details, instances and the catalog concurrently
    async fn fetch(&self, selections: &[Selection<'_>]) -> Snapshot {
        let mut detail_ids = BTreeSet::new();
        let mut instance_ids = BTreeSet::new();
        for s in selections {
            detail_ids.extend(s.targets.iter().copied());
            detail_ids.extend(s.window.iter().flatten().copied());
            instance_ids.extend(s.targets.iter().copied());
        }
        let with_catalog = selections.iter().any(|s| needs_catalog(s.body));

        let details = join_all(detail_ids.iter().map(|&id| async move {
            (id, self.metrics.workout_detail(id).await)
        }));
        let instances = join_all(instance_ids.iter().map(|&id| async move {
            (id, self.instances.exercise_instances(id).await)
        }));
        let catalog = async {
            if with_catalog {
                Some(self.catalog.catalog().await)
            } else {
                None
            }
        };
        let (details, instances, catalog) = futures::join!(details, instances, catalog);

        let mut snapshot = Snapshot::default();
        for (id, result) in details {
            match result {
                Ok(Some(detail)) => {
                    snapshot.details.insert(id, detail);
                }
                Ok(None) => tracing::debug!("No detail for workout {}", id),
                Err(e @ Error::DataUnavailable(_)) => tracing::debug!("Workout {}: {}", id, e),
                Err(e) => tracing::warn!("Fetching detail for workout {} failed: {}", id, e),
            }
        }
        for (id, result) in instances {
            match result {
                Ok(list) => {
                    snapshot.instances.insert(id, list);
                }
                Err(e) => tracing::warn!("Fetching instances for workout {} failed: {}", id, e),
            }
        }
        snapshot.catalog = match catalog {
            Some(Ok(entries)) => {
                let index = CatalogIndex::build(entries);
                if index.is_empty() {
                    tracing::warn!("Exercise catalog is empty, tag selectors match nothing");
                } else {
                    tracing::debug!("Indexed {} catalog exercises", index.len());
                }
                for problem in index.validate() {
                    tracing::debug!("Catalog: {}", problem);
                }
                Some(index)
            }
            Some(Err(e)) => {
                tracing::warn!("Fetching exercise catalog failed: {}", e);
                None
            }
            None => None,
        };

        tracing::debug!(
            "Fetched {} details, {} instance lists",
            snapshot.details.len(),
            snapshot.instances.len()
        );
        snapshot
    }

    fn evaluate(
        &self,
        applied_plan_id: i64,
        selection: &Selection,
        snapshot: &Snapshot,
    ) -> PreviewEntry {
        let rule_id = selection.rule.id;
        let body = selection.body;
        let matched = self.matched_workouts(selection, snapshot);
        tracing::debug!(
            "Macro {} matched {:?} of {:?}",
            rule_id,
            matched,
            selection.targets
        );

        let patches = if body.action.kind == ActionType::InjectMesocycle {
            Vec::new()
        } else {
            let scope =
                ExerciseScope::resolve(&body.action, &body.trigger, snapshot.catalog.as_ref());
            let builder = PatchBuilder::new(self.rpe.as_ref(), &self.config.patching);
            matched
                .iter()
                .flat_map(|&workout_id| {
                    builder.build(&body.action, &scope, snapshot.instances(workout_id))
                })
                .collect()
        };
        let plan_changes = build_plan_changes(rule_id, applied_plan_id, &body.action, &matched);

        PreviewEntry {
            macro_id: rule_id,
            target_workouts: selection.targets.clone(),
            matched_workouts: matched,
            patches,
            plan_changes,
        }
    }

    fn matched_workouts(&self, selection: &Selection, snapshot: &Snapshot) -> Vec<i64> {
        let rule_id = selection.rule.id;
        let condition = &selection.body.condition;
        let tie_break = self.config.evaluation.e1rm_tie_break;
        let evaluator = TriggerEvaluator::new(&selection.body.trigger, tie_break);

        if !evaluator.is_supported() {
            tracing::warn!("Macro {}: unsupported trigger metric", rule_id);
            return Vec::new();
        }

        if condition.op.is_window() {
            let Some(window) = &selection.window else {
                tracing::debug!(
                    "Macro {}: fewer than {:?} workouts before the anchor",
                    rule_id,
                    condition.n
                );
                return Vec::new();
            };
            let series = evaluator.series(window.iter().map(|&id| snapshot.detail(id)));
            return if evaluate_window(condition, &series) {
                selection.targets.clone()
            } else {
                Vec::new()
            };
        }

        if evaluator.metric() == Metric::PerformanceTrend {
            tracing::debug!(
                "Macro {}: Performance_Trend needs a window operator, got {:?}",
                rule_id,
                condition.op
            );
            return Vec::new();
        }

        selection
            .targets
            .iter()
            .copied()
            .filter(|&workout_id| {
                let detail = snapshot.detail(workout_id);
                if detail.is_none() {
                    let missing = Error::DataUnavailable(format!("workout {}", workout_id));
                    tracing::debug!("Macro {}: {}", rule_id, missing);
                }
                match condition.op {
                    Op::HoldsForSets => evaluator
                        .set_deltas(detail)
                        .iter()
                        .any(|(_, deltas)| evaluate_set_run(condition, deltas)),
                    _ => evaluate_value(condition, evaluator.value(detail)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::json_store::{JsonStore, StoreData};
    use crate::types::{Anchor, ExerciseLog, Patch, PatchChanges, SetLog, SetRecord, Workout};
    use serde_json::{json, Value};

    const EXERCISE: i64 = 10;

    fn rule(id: i64, priority: i32, body: Value) -> MacroRule {
        MacroRule {
            id,
            plan_id: 10,
            name: format!("macro {}", id),
            is_active: true,
            priority,
            rule: body,
        }
    }

    fn readiness_rule(op: &str, value: f64, count: usize) -> Value {
        json!({
            "trigger": {"metric": "Readiness_Score"},
            "condition": {"op": op, "value": value},
            "action": {"type": "Adjust_Load", "params": {"mode": "by_Percent", "value": -10}},
            "duration": {"scope": "Next_N_Workouts", "count": count}
        })
    }

    fn readiness(workout_id: i64, score: f64) -> WorkoutDetail {
        WorkoutDetail {
            workout_id,
            readiness_score: Some(score),
            session_rpe: None,
            exercises: vec![],
        }
    }

    fn top_set(workout_id: i64, weight: f64) -> WorkoutDetail {
        WorkoutDetail {
            workout_id,
            readiness_score: None,
            session_rpe: None,
            exercises: vec![ExerciseLog {
                exercise_id: EXERCISE,
                sets: vec![SetLog {
                    set_id: Some(workout_id),
                    actual_weight: Some(weight),
                    actual_reps: Some(1.0),
                    ..Default::default()
                }],
            }],
        }
    }

    /// Six workouts (ids 100..=105), each with two planned sets of exercise 10
    fn store(cursor: i64, macros: Vec<MacroRule>, details: Vec<WorkoutDetail>) -> Arc<JsonStore> {
        let workouts = (0..6)
            .map(|i| Workout {
                id: 100 + i,
                order_index: i,
                mesocycle_id: Some(1),
                name: None,
            })
            .collect();
        let exercise_instances = (0..6)
            .map(|i| ExerciseInstance {
                workout_id: 100 + i,
                exercise_id: EXERCISE,
                sets: vec![
                    SetRecord::from(json!({"id": 2 * i + 1, "reps": 5, "intensity": 80.0})),
                    SetRecord::from(json!({"id": 2 * i + 2, "reps": 5, "intensity": 80.0})),
                ],
            })
            .collect();
        Arc::new(JsonStore::in_memory(StoreData {
            applied_plans: vec![AppliedPlan {
                id: 1,
                plan_id: 10,
                current_workout_index: cursor,
                workouts,
            }],
            macros,
            workout_details: details,
            exercise_instances,
            ..Default::default()
        }))
    }

    fn engine(store: Arc<JsonStore>) -> MacroEngine {
        MacroEngine::with_backend(store, Config::default())
    }

    fn intensity(patch: &Patch) -> Option<f64> {
        match &patch.changes {
            PatchChanges::Fields(f) => f.get("intensity").and_then(Value::as_f64),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_low_readiness_reduces_load_on_matching_workout_only() {
        crate::logging::init_test();
        let s = store(
            0,
            vec![rule(1, 0, readiness_rule("<", 4.0, 2))],
            vec![readiness(100, 3.0), readiness(101, 5.0)],
        );

        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.macros_evaluated, 1);
        assert_eq!(report.actions_applied, 0);
        assert!(report.apply.is_none());

        let entry = &report.preview[0];
        assert_eq!(entry.target_workouts, vec![100, 101]);
        assert_eq!(entry.matched_workouts, vec![100]);
        assert_eq!(entry.patches.len(), 2);
        for patch in &entry.patches {
            assert_eq!(patch.workout_id, 100);
            assert_eq!(intensity(patch), Some(72.0));
        }
    }

    #[tokio::test]
    async fn test_missing_detail_does_not_match() {
        let s = store(0, vec![rule(1, 0, readiness_rule("<", 4.0, 2))], vec![]);
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert!(report.preview[0].matched_workouts.is_empty());
        assert!(report.preview[0].patches.is_empty());
    }

    #[tokio::test]
    async fn test_stagnation_boundary() {
        let body = json!({
            "trigger": {"metric": "Performance_Trend", "exercise_ids": [EXERCISE]},
            "condition": {"op": "stagnates_for", "n": 3, "epsilon_percent": 1.0},
            "action": {"type": "Adjust_Sets", "params": {"mode": "by_Value", "value": 1}},
            "duration": {"scope": "Next_N_Workouts", "count": 1}
        });

        // width 2% of the mean: above epsilon
        let s = store(
            3,
            vec![rule(1, 0, body.clone())],
            vec![top_set(100, 100.0), top_set(101, 101.0), top_set(102, 99.0)],
        );
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.preview[0].target_workouts, vec![103]);
        assert!(report.preview[0].matched_workouts.is_empty());

        // width 0.5%: stagnant
        let s = store(
            3,
            vec![rule(1, 0, body)],
            vec![top_set(100, 100.0), top_set(101, 100.5), top_set(102, 100.0)],
        );
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        let entry = &report.preview[0];
        assert_eq!(entry.matched_workouts, vec![103]);
        assert_eq!(entry.patches.len(), 1);
        assert_eq!(entry.patches[0].set_id, None);
    }

    #[tokio::test]
    async fn test_short_window_never_matches() {
        let body = json!({
            "trigger": {"metric": "Readiness_Score"},
            "condition": {"op": "holds_for", "relation": ">=", "value": 0, "n": 3},
            "action": {"type": "Adjust_Reps", "params": {"mode": "by_Value", "value": 1}},
            "duration": {"scope": "Next_N_Workouts", "count": 1}
        });
        let s = store(
            2,
            vec![rule(1, 0, body)],
            vec![readiness(100, 9.0), readiness(101, 9.0)],
        );
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert!(report.preview[0].matched_workouts.is_empty());
    }

    #[tokio::test]
    async fn test_previous_anchor_reads_one_more_workout() {
        let body = json!({
            "trigger": {"metric": "Readiness_Score"},
            "condition": {"op": "holds_for", "relation": ">=", "value": 7, "n": 2},
            "action": {"type": "Adjust_Reps", "params": {"mode": "by_Value", "value": 1}},
            "duration": {"scope": "Next_N_Workouts", "count": 1}
        });
        let details = vec![readiness(100, 8.0), readiness(101, 8.0), readiness(102, 3.0)];

        let s = store(3, vec![rule(1, 0, body.clone())], details.clone());
        let current = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert!(current.preview[0].matched_workouts.is_empty());

        let s = store(3, vec![rule(1, 0, body)], details);
        let options = RunOptions {
            anchor: Anchor::Previous,
            ..Default::default()
        };
        let previous = engine(s).run(1, options).await.unwrap();
        assert_eq!(previous.preview[0].matched_workouts, vec![102]);
    }

    #[tokio::test]
    async fn test_holds_for_sets_per_workout() {
        let body = json!({
            "trigger": {"metric": "RPE_Delta_From_Plan"},
            "condition": {"op": "holds_for_sets", "relation": ">=", "value": 1, "n_sets": 2},
            "action": {"type": "Adjust_Load", "params": {"mode": "by_Percent", "value": -5}},
            "duration": {"scope": "Next_N_Workouts", "count": 2}
        });
        let logged = |workout_id: i64, actual: [f64; 3]| WorkoutDetail {
            workout_id,
            readiness_score: None,
            session_rpe: None,
            exercises: vec![ExerciseLog {
                exercise_id: EXERCISE,
                sets: actual
                    .iter()
                    .map(|&rpe| SetLog {
                        planned_rpe: Some(7.0),
                        actual_rpe: Some(rpe),
                        ..Default::default()
                    })
                    .collect(),
            }],
        };
        let s = store(
            0,
            vec![rule(1, 0, body)],
            vec![logged(100, [8.0, 8.5, 7.0]), logged(101, [8.0, 7.0, 8.0])],
        );

        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.preview[0].matched_workouts, vec![100]);
    }

    #[tokio::test]
    async fn test_unsupported_metric_matches_nothing() {
        let body = json!({
            "trigger": {"metric": "Heart_Rate_Variability"},
            "condition": {"op": ">", "value": 0},
            "action": {"type": "Adjust_Reps", "params": {"mode": "by_Value", "value": 1}},
            "duration": {"scope": "Next_N_Workouts", "count": 1}
        });
        let s = store(0, vec![rule(1, 0, body)], vec![readiness(100, 5.0)]);
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.macros_evaluated, 1);
        assert!(report.preview[0].matched_workouts.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_rule_is_skipped() {
        let s = store(
            0,
            vec![
                rule(1, 0, json!({"trigger": 5})),
                rule(2, 0, readiness_rule("<", 4.0, 1)),
            ],
            vec![readiness(100, 3.0)],
        );
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.macros_evaluated, 1);
        assert_eq!(report.preview[0].macro_id, 2);
        assert_eq!(report.preview[0].matched_workouts, vec![100]);
    }

    #[tokio::test]
    async fn test_rules_run_in_priority_order() {
        let mut inactive = rule(4, -5, readiness_rule("<", 4.0, 1));
        inactive.is_active = false;
        let s = store(
            0,
            vec![
                rule(3, 2, readiness_rule("<", 4.0, 1)),
                rule(1, 2, readiness_rule("<", 4.0, 1)),
                rule(2, 1, readiness_rule("<", 4.0, 1)),
                inactive,
            ],
            vec![],
        );
        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        let order: Vec<i64> = report.preview.iter().map(|e| e.macro_id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_oversized_set_change_does_not_stop_other_rules() {
        let sets_rule = |value: f64| {
            json!({
                "trigger": {"metric": "Readiness_Score"},
                "condition": {"op": "<", "value": 4},
                "action": {"type": "Adjust_Sets", "params": {"mode": "by_Value", "value": value}},
                "duration": {"scope": "Next_N_Workouts", "count": 1}
            })
        };
        let s = store(
            0,
            vec![rule(1, 0, sets_rule(1e300)), rule(2, 1, sets_rule(1.0))],
            vec![readiness(100, 3.0)],
        );

        let report = engine(s).run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.macros_evaluated, 2);
        assert_eq!(report.preview[0].matched_workouts, vec![100]);
        assert!(report.preview[0].patches.is_empty());
        assert_eq!(report.preview[1].macro_id, 2);
        assert_eq!(report.preview[1].patches.len(), 1);
    }

    /// Lookup that prescribes the same intensity for every set
    struct FlatChart(f64);

    impl RpeLookup for FlatChart {
        fn intensity_for(&self, _reps: f64, _rpe: f64) -> Option<f64> {
            Some(self.0)
        }

        fn reps_for(&self, _intensity: f64, _rpe: f64) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn test_custom_rpe_lookup_drives_targets() {
        let mut body = readiness_rule("<", 4.0, 1);
        body["action"]["params"] = json!({"mode": "to_Target", "value": 8});
        let s = store(0, vec![rule(1, 0, body)], vec![readiness(100, 3.0)]);

        let report = engine(s)
            .with_rpe(Arc::new(FlatChart(65.0)))
            .run(1, RunOptions::default())
            .await
            .unwrap();
        let patches = &report.preview[0].patches;
        assert_eq!(patches.len(), 2);
        assert!(patches.iter().all(|p| intensity(p) == Some(65.0)));
    }

    /// Metric provider whose readiness feed is offline
    struct NoMetrics;

    #[async_trait::async_trait]
    impl MetricProvider for NoMetrics {
        async fn workout_detail(&self, workout_id: i64) -> Result<Option<WorkoutDetail>> {
            Err(Error::DataUnavailable(format!("readiness for workout {}", workout_id)))
        }
    }

    #[tokio::test]
    async fn test_unavailable_metrics_match_nothing() {
        let s = store(
            0,
            vec![rule(1, 0, readiness_rule("<", 4.0, 2))],
            vec![readiness(100, 3.0)],
        );
        let e = MacroEngine::new(
            s.clone(),
            Arc::new(NoMetrics),
            s.clone(),
            s.clone(),
            s,
            Config::default(),
        );

        let report = e.run(1, RunOptions::default()).await.unwrap();
        assert_eq!(report.preview[0].target_workouts, vec![100, 101]);
        assert!(report.preview[0].matched_workouts.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plan_is_an_error() {
        let s = store(0, vec![], vec![]);
        let result = engine(s).run(99, RunOptions::default()).await;
        assert!(matches!(result, Err(Error::PlanNotFound(99))));
    }

    #[tokio::test]
    async fn test_inject_mesocycle_emits_plan_change() {
        let body = json!({
            "trigger": {"metric": "Readiness_Score"},
            "condition": {"op": "<", "value": 4},
            "action": {
                "type": "Inject_Mesocycle",
                "params": {
                    "mode": "by_Template",
                    "template_id": 30,
                    "placement": {"after_workout": 101}
                }
            },
            "duration": {"scope": "Next_N_Workouts", "count": 2}
        });
        let s = store(0, vec![rule(7, 0, body)], vec![readiness(100, 2.0)]);

        let report = engine(s.clone())
            .run(
                1,
                RunOptions {
                    apply: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let entry = &report.preview[0];
        assert!(entry.patches.is_empty());
        assert_eq!(entry.plan_changes.len(), 1);
        assert_eq!(entry.plan_changes[0].matched_workouts, vec![100]);
        assert_eq!(entry.plan_changes[0].applied_plan_id, 1);

        let applied = report.apply.unwrap();
        assert_eq!(applied.plan_changes_applied, 1);
        assert_eq!(s.snapshot().unwrap().plan_changes.len(), 1);
    }

    #[tokio::test]
    async fn test_selector_targets_catalog_exercises() {
        let mut body = readiness_rule("<", 4.0, 1);
        body["action"]["target"] =
            json!({"selector": {"type": "tags", "value": {"muscle_group": "legs"}}});

        let mut data = store(0, vec![rule(1, 0, body)], vec![readiness(100, 3.0)])
            .snapshot()
            .unwrap();
        data.catalog = vec![CatalogEntry {
            id: EXERCISE,
            name: "Back Squat".into(),
            muscle_groups: vec!["Legs".into()],
            target_muscles: vec![],
            equipment: vec!["barbell".into()],
            movement_type: None,
        }];
        data.exercise_instances.push(ExerciseInstance {
            workout_id: 100,
            exercise_id: 11,
            sets: vec![SetRecord::from(json!({"id": 50, "intensity": 70.0}))],
        });

        let report = engine(Arc::new(JsonStore::in_memory(data)))
            .run(1, RunOptions::default())
            .await
            .unwrap();
        let patches = &report.preview[0].patches;
        assert_eq!(patches.len(), 2);
        assert!(patches.iter().all(|p| p.exercise_id == EXERCISE));
    }

    #[tokio::test]
    async fn test_run_with_apply_writes_sets() {
        let s = store(
            0,
            vec![rule(1, 0, readiness_rule("<", 4.0, 2))],
            vec![readiness(100, 3.0), readiness(101, 5.0)],
        );
        let e = engine(s.clone());
        let options = RunOptions {
            apply: true,
            ..Default::default()
        };

        let report = e.run(1, options).await.unwrap();
        assert_eq!(report.actions_applied, 1);
        let instances = s.exercise_instances(100).await.unwrap();
        assert_eq!(instances[0].sets[0].number("intensity"), Some(72.0));
        let untouched = s.exercise_instances(101).await.unwrap();
        assert_eq!(untouched[0].sets[0].number("intensity"), Some(80.0));

        // Replaying the same preview leaves the sets as they are
        let replay = e.apply(&report.preview).await;
        assert_eq!(replay.applied, 0);
        assert!(replay.errors.is_empty());
    }

    #[tokio::test]
    async fn test_rules_listing_reports_parse_status() {
        let mut inactive = rule(3, 0, readiness_rule("<", 4.0, 1));
        inactive.is_active = false;
        let s = store(
            0,
            vec![
                rule(2, 1, json!({"trigger": {}})),
                rule(1, 1, readiness_rule("<", 4.0, 1)),
                inactive,
            ],
            vec![],
        );

        let statuses = engine(s).rules(1).await.unwrap();
        let ids: Vec<i64> = statuses.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(!statuses[0].is_active);
        assert!(statuses[1].error.is_none());
        assert!(statuses[2].error.is_some());
    }
}

//! Core domain types for the plan macro engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Macro rules and their trigger/condition/action/duration parts
//! - Applied plans, workouts and the externally-owned metric records
//! - Exercise instances and the planned sets they carry
//! - Patches, plan changes and the preview/apply reports

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Macro Rules
// ============================================================================

/// A stored automation rule attached to a plan
///
/// The `rule` body is kept as raw JSON so that one malformed rule can be
/// skipped without failing the whole load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MacroRule {
    pub id: i64,
    pub plan_id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
    pub rule: Value,
}

fn default_true() -> bool {
    true
}

impl MacroRule {
    /// Parse and validate the rule body
    pub fn parse_body(&self) -> Result<RuleBody> {
        let body: RuleBody =
            serde_json::from_value(self.rule.clone()).map_err(|e| Error::Configuration {
                rule_id: self.id,
                message: e.to_string(),
            })?;
        body.validate().map_err(|message| Error::Configuration {
            rule_id: self.id,
            message,
        })?;
        Ok(body)
    }
}

/// Sort rules into evaluation order: priority ascending, then id ascending
pub fn sort_for_evaluation(rules: &mut [MacroRule]) {
    rules.sort_by_key(|r| (r.priority, r.id));
}

/// Parsed rule body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleBody {
    pub trigger: Trigger,
    pub condition: Condition,
    pub action: Action,
    pub duration: RuleDuration,
}

impl RuleBody {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.duration.count < 1 {
            return Err("duration.count must be at least 1".into());
        }
        if let Some([lo, hi]) = self.condition.range {
            if !lo.is_finite() || !hi.is_finite() {
                return Err("condition.range must be finite".into());
            }
        }
        if let Some(relation) = self.condition.relation {
            if !relation.is_relation() {
                return Err(format!("{:?} cannot be used as a relation", relation));
            }
        }
        Ok(())
    }
}

/// Metric a trigger watches
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Metric {
    #[serde(rename = "Readiness_Score")]
    ReadinessScore,
    #[serde(rename = "RPE_Session")]
    RpeSession,
    #[serde(rename = "e1RM")]
    E1rm,
    #[serde(rename = "Performance_Trend")]
    PerformanceTrend,
    #[serde(rename = "Total_Reps")]
    TotalReps,
    #[serde(rename = "RPE_Delta_From_Plan")]
    RpeDeltaFromPlan,
    #[serde(rename = "Reps_Delta_From_Plan")]
    RepsDeltaFromPlan,
    /// Any metric name this engine does not know
    #[serde(other)]
    Unsupported,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trigger {
    pub metric: Metric,
    #[serde(default)]
    pub exercise_ids: Option<Vec<i64>>,
}

/// Condition operator, also used for the `relation` of `holds_for*`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Op {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=", alias = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in_range")]
    InRange,
    #[serde(rename = "not_in_range")]
    NotInRange,
    #[serde(rename = "stagnates_for")]
    StagnatesFor,
    #[serde(rename = "deviates_from_avg")]
    DeviatesFromAvg,
    #[serde(rename = "holds_for")]
    HoldsFor,
    #[serde(rename = "holds_for_sets")]
    HoldsForSets,
}

impl Op {
    /// Operators that compare a single value against `value`/`range`
    pub fn is_relation(self) -> bool {
        matches!(
            self,
            Op::Gt | Op::Lt | Op::Ge | Op::Le | Op::Eq | Op::Ne | Op::InRange | Op::NotInRange
        )
    }

    /// Operators evaluated over the workouts strictly before the anchor
    pub fn is_window(self) -> bool {
        matches!(self, Op::StagnatesFor | Op::DeviatesFromAvg | Op::HoldsFor)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub op: Op,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub n_sets: Option<usize>,
    #[serde(default)]
    pub relation: Option<Op>,
    #[serde(default)]
    pub epsilon_percent: Option<f64>,
    #[serde(default)]
    pub value_percent: Option<f64>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionType {
    #[serde(rename = "Adjust_Load")]
    AdjustLoad,
    #[serde(rename = "Adjust_Sets")]
    AdjustSets,
    #[serde(rename = "Adjust_Reps")]
    AdjustReps,
    #[serde(rename = "Inject_Mesocycle")]
    InjectMesocycle,
}

/// How an action's `value` is interpreted
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdjustMode {
    #[serde(rename = "by_Percent")]
    ByPercent,
    #[serde(rename = "to_Target")]
    ToTarget,
    #[serde(rename = "by_Value")]
    ByValue,
    #[serde(rename = "by_Template")]
    ByTemplate,
    #[serde(rename = "by_Existing")]
    ByExisting,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(default)]
    pub mode: Option<AdjustMode>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub template_id: Option<i64>,
    #[serde(default)]
    pub source_mesocycle_id: Option<i64>,
    #[serde(default)]
    pub placement: Option<Value>,
    #[serde(default)]
    pub on_conflict: Option<Value>,
}

/// Tag selector resolved against the exercise catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionTarget {
    #[serde(default)]
    pub exercise_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub selector: Option<Selector>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub params: ActionParams,
    #[serde(default)]
    pub target: Option<ActionTarget>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DurationScope {
    #[serde(rename = "Next_N_Workouts")]
    NextNWorkouts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleDuration {
    pub scope: DurationScope,
    pub count: usize,
}

// ============================================================================
// Plans and Workouts (externally owned, read-only here)
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workout {
    pub id: i64,
    pub order_index: i64,
    #[serde(default)]
    pub mesocycle_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A scheduled copy of a plan template with its workout cursor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppliedPlan {
    pub id: i64,
    /// Template plan the macros are attached to
    pub plan_id: i64,
    pub current_workout_index: i64,
    #[serde(default)]
    pub workouts: Vec<Workout>,
}

/// Which cursor position the target window starts from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    Current,
    Previous,
}

impl FromStr for Anchor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "current" => Ok(Anchor::Current),
            "previous" => Ok(Anchor::Previous),
            other => Err(Error::Validation(format!("Unknown anchor: {}", other))),
        }
    }
}

/// One logged set with its planned and actual values
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetLog {
    #[serde(default)]
    pub set_id: Option<i64>,
    #[serde(default)]
    pub planned_reps: Option<f64>,
    #[serde(default)]
    pub planned_rpe: Option<f64>,
    #[serde(default)]
    pub actual_reps: Option<f64>,
    #[serde(default)]
    pub actual_rpe: Option<f64>,
    #[serde(default)]
    pub actual_weight: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseLog {
    pub exercise_id: i64,
    #[serde(default)]
    pub sets: Vec<SetLog>,
}

/// Per-workout signals fetched from the metric provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutDetail {
    pub workout_id: i64,
    #[serde(default)]
    pub readiness_score: Option<f64>,
    #[serde(default)]
    pub session_rpe: Option<f64>,
    #[serde(default)]
    pub exercises: Vec<ExerciseLog>,
}

// ============================================================================
// Exercise Instances and Planned Sets
// ============================================================================

/// A planned set as stored downstream
///
/// Kept as an open JSON object so fields this engine never touches survive
/// a read-modify-write cycle unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SetRecord(pub Map<String, Value>);

impl SetRecord {
    pub const ID: &'static str = "id";
    pub const REPS: &'static str = "reps";
    pub const INTENSITY: &'static str = "intensity";
    pub const WEIGHT: &'static str = "weight";

    pub fn id(&self) -> Option<i64> {
        self.0.get(Self::ID).and_then(Value::as_i64)
    }

    /// Numeric field value, `None` when absent, null or non-numeric
    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    /// Copy of this record without its id, for cloning into a new set
    pub fn without_id(&self) -> SetRecord {
        let mut map = self.0.clone();
        map.remove(Self::ID);
        SetRecord(map)
    }
}

impl From<Value> for SetRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => SetRecord(map),
            _ => SetRecord::default(),
        }
    }
}

/// All planned sets of one exercise inside one workout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseInstance {
    pub workout_id: i64,
    pub exercise_id: i64,
    #[serde(default)]
    pub sets: Vec<SetRecord>,
}

// ============================================================================
// Patches and Plan Changes
// ============================================================================

/// Structural change to a set list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SetAction {
    AddSet { template: SetRecord },
    RemoveSet,
}

/// What a patch changes: either set fields or the set list itself
///
/// On the wire a map carrying an `action` key is always structural; a
/// malformed structural change is rejected rather than read as fields.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PatchChanges {
    Structural(SetAction),
    Fields(BTreeMap<String, Value>),
}

impl<'de> Deserialize<'de> for PatchChanges {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        if map.contains_key("action") {
            serde_json::from_value(Value::Object(map))
                .map(PatchChanges::Structural)
                .map_err(de::Error::custom)
        } else {
            Ok(PatchChanges::Fields(map.into_iter().collect()))
        }
    }
}

impl PatchChanges {
    pub fn is_empty(&self) -> bool {
        match self {
            PatchChanges::Structural(_) => false,
            PatchChanges::Fields(fields) => fields.is_empty(),
        }
    }
}

/// A field-level or structural mutation against one exercise instance
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Patch {
    pub workout_id: i64,
    pub exercise_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_id: Option<i64>,
    pub changes: PatchChanges,
}

/// Where an injected mesocycle comes from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode")]
pub enum MesocycleSource {
    #[serde(rename = "by_Template")]
    ByTemplate { template_id: i64 },
    #[serde(rename = "by_Existing")]
    ByExisting { source_mesocycle_id: i64 },
}

/// Structural plan change request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanChange {
    pub macro_id: i64,
    pub applied_plan_id: i64,
    pub source: MesocycleSource,
    #[serde(default)]
    pub placement: Option<Value>,
    #[serde(default)]
    pub on_conflict: Option<Value>,
    /// Workouts whose match produced this change
    #[serde(default)]
    pub matched_workouts: Vec<i64>,
}

// ============================================================================
// Preview and Reports
// ============================================================================

/// Outcome of evaluating one macro
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreviewEntry {
    pub macro_id: i64,
    pub target_workouts: Vec<i64>,
    pub matched_workouts: Vec<i64>,
    pub patches: Vec<Patch>,
    pub plan_changes: Vec<PlanChange>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApplyDetail {
    pub workout_id: i64,
    pub exercise_id: i64,
    pub sets_count: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub errors: Vec<String>,
    pub details: Vec<ApplyDetail>,
    #[serde(default)]
    pub plan_changes_applied: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    pub anchor: Anchor,
    pub index_offset: i64,
    /// Execute the preview right after computing it
    pub apply: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub applied_plan_id: i64,
    pub generated_at: DateTime<Utc>,
    pub macros_evaluated: usize,
    pub actions_applied: usize,
    pub preview: Vec<PreviewEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyReport>,
}

/// A macro listed in evaluation order with its parse status
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleStatus {
    pub id: i64,
    pub name: String,
    pub priority: i32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

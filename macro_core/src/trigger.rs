//! Trigger evaluation: resolving a rule's metric into values.
//!
//! Per-workout metrics yield one `Option<f64>` per workout; window
//! conditions read a chronological series of those values; `holds_for_sets`
//! reads the ordered per-set deltas of each exercise.

use crate::config::TieBreak;
use crate::types::{ExerciseLog, Metric, SetLog, Trigger, WorkoutDetail};

/// Estimated one-rep max: `weight * (1 + reps / 30)` for reps > 1, else `weight`
pub fn estimate_1rm(weight: f64, reps: f64) -> f64 {
    if reps > 1.0 {
        weight * (1.0 + reps / 30.0)
    } else {
        weight
    }
}

/// The best e1RM set found in a workout
#[derive(Clone, Debug, PartialEq)]
pub struct BestEffort {
    pub value: f64,
    pub exercise_id: i64,
    pub set_id: Option<i64>,
}

/// Best e1RM across the given exercises' completed sets
///
/// Sets without an actual weight, or with fewer than one actual rep, are
/// ignored. Ties are settled by `tie_break` in logged set order.
pub fn best_e1rm(
    detail: &WorkoutDetail,
    exercise_ids: Option<&[i64]>,
    tie_break: TieBreak,
) -> Option<BestEffort> {
    let mut best: Option<BestEffort> = None;

    for exercise in selected(detail, exercise_ids) {
        for set in &exercise.sets {
            let (Some(weight), Some(reps)) = (set.actual_weight, set.actual_reps) else {
                continue;
            };
            if reps < 1.0 || !weight.is_finite() {
                continue;
            }
            let value = estimate_1rm(weight, reps);
            let replace = match &best {
                None => true,
                Some(current) => match tie_break {
                    TieBreak::Earliest => value > current.value,
                    TieBreak::Latest => value >= current.value,
                },
            };
            if replace {
                best = Some(BestEffort {
                    value,
                    exercise_id: exercise.exercise_id,
                    set_id: set.set_id,
                });
            }
        }
    }

    best
}

fn selected<'a>(
    detail: &'a WorkoutDetail,
    exercise_ids: Option<&'a [i64]>,
) -> impl Iterator<Item = &'a ExerciseLog> + 'a {
    detail
        .exercises
        .iter()
        .filter(move |e| exercise_ids.map_or(true, |ids| ids.contains(&e.exercise_id)))
}

fn set_delta(metric: Metric, set: &SetLog) -> Option<f64> {
    match metric {
        Metric::RpeDeltaFromPlan => Some(set.actual_rpe? - set.planned_rpe?),
        Metric::RepsDeltaFromPlan => Some(set.actual_reps? - set.planned_reps?),
        _ => None,
    }
}

/// Resolves one trigger against fetched workout details
#[derive(Clone, Copy, Debug)]
pub struct TriggerEvaluator<'a> {
    trigger: &'a Trigger,
    tie_break: TieBreak,
}

impl<'a> TriggerEvaluator<'a> {
    pub fn new(trigger: &'a Trigger, tie_break: TieBreak) -> Self {
        Self { trigger, tie_break }
    }

    pub fn metric(&self) -> Metric {
        self.trigger.metric
    }

    pub fn is_supported(&self) -> bool {
        self.trigger.metric != Metric::Unsupported
    }

    fn exercise_ids(&self) -> Option<&'a [i64]> {
        self.trigger.exercise_ids.as_deref()
    }

    /// Per-workout value, `None` when the workout or datapoint is missing
    pub fn value(&self, detail: Option<&WorkoutDetail>) -> Option<f64> {
        let detail = detail?;
        match self.trigger.metric {
            Metric::ReadinessScore => detail.readiness_score,
            Metric::RpeSession => detail.session_rpe,
            Metric::E1rm | Metric::PerformanceTrend => {
                best_e1rm(detail, self.exercise_ids(), self.tie_break).map(|b| b.value)
            }
            Metric::TotalReps => {
                let reps: Vec<f64> = selected(detail, self.exercise_ids())
                    .flat_map(|e| e.sets.iter().filter_map(|s| s.actual_reps))
                    .collect();
                if reps.is_empty() {
                    None
                } else {
                    Some(reps.iter().sum())
                }
            }
            Metric::RpeDeltaFromPlan | Metric::RepsDeltaFromPlan => {
                let deltas: Vec<f64> = selected(detail, self.exercise_ids())
                    .flat_map(|e| e.sets.iter().filter_map(|s| set_delta(self.trigger.metric, s)))
                    .collect();
                if deltas.is_empty() {
                    None
                } else {
                    Some(deltas.iter().sum::<f64>() / deltas.len() as f64)
                }
            }
            Metric::Unsupported => None,
        }
    }

    /// Chronological series of per-workout values
    pub fn series<'d>(
        &self,
        details: impl IntoIterator<Item = Option<&'d WorkoutDetail>>,
    ) -> Vec<Option<f64>> {
        details.into_iter().map(|d| self.value(d)).collect()
    }

    /// Ordered per-set deltas for each selected exercise of one workout
    ///
    /// Only delta metrics produce deltas; a set missing either side of the
    /// comparison contributes `None`.
    pub fn set_deltas(&self, detail: Option<&WorkoutDetail>) -> Vec<(i64, Vec<Option<f64>>)> {
        let Some(detail) = detail else {
            return Vec::new();
        };
        if !matches!(
            self.trigger.metric,
            Metric::RpeDeltaFromPlan | Metric::RepsDeltaFromPlan
        ) {
            return Vec::new();
        }
        selected(detail, self.exercise_ids())
            .map(|e| {
                let deltas = e
                    .sets
                    .iter()
                    .map(|s| set_delta(self.trigger.metric, s))
                    .collect();
                (e.exercise_id, deltas)
            })
            .collect()
    }
}

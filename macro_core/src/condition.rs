//! Condition evaluation: pure predicates over resolved values and series.
//!
//! Nothing here fetches data. Missing datapoints are `None` and always make
//! a predicate fail closed.

use crate::types::{Condition, Direction, Op};

/// Tolerance for `=` and `!=`
pub const EQ_EPSILON: f64 = 1e-6;

/// Order range endpoints so `[b, a]` behaves like `[a, b]`
pub fn normalize_range([a, b]: [f64; 2]) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Compare one value with a relational or range operator
///
/// Window operators and missing operands yield `false`.
pub fn compare(op: Op, value: f64, target: Option<f64>, range: Option<[f64; 2]>) -> bool {
    if value.is_nan() {
        return false;
    }

    match op {
        Op::InRange | Op::NotInRange => {
            let Some(range) = range else {
                return false;
            };
            let (lo, hi) = normalize_range(range);
            let inside = value >= lo && value <= hi;
            if op == Op::InRange {
                inside
            } else {
                !inside
            }
        }
        Op::Gt | Op::Lt | Op::Ge | Op::Le | Op::Eq | Op::Ne => {
            let Some(target) = target else {
                return false;
            };
            match op {
                Op::Gt => value > target,
                Op::Lt => value < target,
                Op::Ge => value >= target,
                Op::Le => value <= target,
                Op::Eq => (value - target).abs() <= EQ_EPSILON,
                _ => (value - target).abs() > EQ_EPSILON,
            }
        }
        Op::StagnatesFor | Op::DeviatesFromAvg | Op::HoldsFor | Op::HoldsForSets => false,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// True iff the series' spread relative to its mean is within `epsilon_percent`
pub fn stagnates_for(series: &[f64], epsilon_percent: f64) -> bool {
    let Some(avg) = mean(series) else {
        return false;
    };
    if avg == 0.0 {
        return false;
    }
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);
    (max - min) / avg.abs() * 100.0 <= epsilon_percent
}

/// True iff the last value deviates from the mean of the earlier values by
/// at least `value_percent`, optionally only in one direction
pub fn deviates_from_avg(series: &[f64], value_percent: f64, direction: Option<Direction>) -> bool {
    let Some((&last, prior)) = series.split_last() else {
        return false;
    };
    let Some(avg) = mean(prior) else {
        return false;
    };
    if avg == 0.0 {
        return false;
    }

    let delta = last - avg;
    let direction_ok = match direction {
        Some(Direction::Positive) => delta > 0.0,
        Some(Direction::Negative) => delta < 0.0,
        None => true,
    };
    direction_ok && delta.abs() / avg.abs() * 100.0 >= value_percent
}

/// True iff each of the last `n` datapoints satisfies `relation`
///
/// The window must hold at least `n` entries and none of the last `n` may
/// be missing.
pub fn holds_for(
    window: &[Option<f64>],
    n: usize,
    relation: Op,
    target: Option<f64>,
    range: Option<[f64; 2]>,
) -> bool {
    if n == 0 || window.len() < n {
        return false;
    }
    window[window.len() - n..]
        .iter()
        .all(|point| point.is_some_and(|v| compare(relation, v, target, range)))
}

/// True iff some run of at least `n_sets` consecutive deltas satisfies
/// `relation`; a missing delta resets the run
pub fn holds_for_sets(
    deltas: &[Option<f64>],
    n_sets: usize,
    relation: Op,
    target: Option<f64>,
    range: Option<[f64; 2]>,
) -> bool {
    if n_sets == 0 {
        return false;
    }
    let mut run = 0usize;
    for delta in deltas {
        match delta {
            Some(v) if compare(relation, *v, target, range) => {
                run += 1;
                if run >= n_sets {
                    return true;
                }
            }
            _ => run = 0,
        }
    }
    false
}

/// Evaluate a scalar condition against one per-workout value
pub fn evaluate_value(condition: &Condition, value: Option<f64>) -> bool {
    let Some(value) = value else {
        return false;
    };
    compare(condition.op, value, condition.value, condition.range)
}

/// Evaluate a window condition against the datapoints before the anchor
pub fn evaluate_window(condition: &Condition, window: &[Option<f64>]) -> bool {
    let Some(n) = condition.n else {
        tracing::debug!("{:?} without n cannot be evaluated", condition.op);
        return false;
    };
    if n == 0 || window.len() < n {
        return false;
    }
    let window = &window[window.len() - n..];

    match condition.op {
        Op::HoldsFor => {
            let Some(relation) = condition.relation else {
                tracing::debug!("holds_for without relation cannot be evaluated");
                return false;
            };
            holds_for(window, n, relation, condition.value, condition.range)
        }
        Op::StagnatesFor => {
            let (Some(series), Some(eps)) = (complete(window), condition.epsilon_percent) else {
                return false;
            };
            stagnates_for(&series, eps)
        }
        Op::DeviatesFromAvg => {
            let threshold = condition.value_percent.or(condition.value);
            let (Some(series), Some(threshold)) = (complete(window), threshold) else {
                return false;
            };
            deviates_from_avg(&series, threshold, condition.direction)
        }
        other => {
            tracing::debug!("{:?} is not a window operator", other);
            false
        }
    }
}

/// Evaluate `holds_for_sets` against per-set deltas of one exercise
pub fn evaluate_set_run(condition: &Condition, deltas: &[Option<f64>]) -> bool {
    let (Some(relation), Some(n_sets)) = (condition.relation, condition.n_sets.or(condition.n))
    else {
        tracing::debug!("holds_for_sets needs relation and n_sets");
        return false;
    };
    holds_for_sets(deltas, n_sets, relation, condition.value, condition.range)
}

/// All datapoints, or `None` if any is missing
fn complete(window: &[Option<f64>]) -> Option<Vec<f64>> {
    window.iter().copied().collect()
}

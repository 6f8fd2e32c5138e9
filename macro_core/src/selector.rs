//! Workout selection relative to the plan cursor.

use crate::types::{Anchor, AppliedPlan, Workout};

/// Resolve the anchor index from the plan cursor
///
/// `Previous` rewinds one workout so a just-finished session is included.
pub fn anchor_index(current_workout_index: i64, anchor: Anchor, index_offset: i64) -> i64 {
    let base = current_workout_index + index_offset;
    match anchor {
        Anchor::Current => base,
        Anchor::Previous => base - 1,
    }
}

/// The plan's workouts in order, split around an anchor index
#[derive(Clone, Debug)]
pub struct WorkoutSelector<'a> {
    ordered: Vec<&'a Workout>,
    anchor: i64,
}

impl<'a> WorkoutSelector<'a> {
    pub fn new(plan: &'a AppliedPlan, anchor: Anchor, index_offset: i64) -> Self {
        let mut ordered: Vec<&Workout> = plan.workouts.iter().collect();
        ordered.sort_by_key(|w| (w.order_index, w.id));
        Self {
            ordered,
            anchor: anchor_index(plan.current_workout_index, anchor, index_offset),
        }
    }

    pub fn anchor(&self) -> i64 {
        self.anchor
    }

    /// First `count` workouts at or after the anchor
    pub fn targets(&self, count: usize) -> Vec<&'a Workout> {
        self.ordered
            .iter()
            .filter(|w| w.order_index >= self.anchor)
            .take(count)
            .copied()
            .collect()
    }

    /// The `n` workouts strictly before the anchor, ascending
    ///
    /// `None` when fewer than `n` exist, since a short window cannot be
    /// evaluated.
    pub fn window(&self, n: usize) -> Option<Vec<&'a Workout>> {
        if n == 0 {
            return None;
        }
        let before: Vec<&Workout> = self
            .ordered
            .iter()
            .filter(|w| w.order_index < self.anchor)
            .copied()
            .collect();
        if before.len() < n {
            return None;
        }
        Some(before[before.len() - n..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(cursor: i64) -> AppliedPlan {
        // Stored out of order on purpose
        let workouts = [3, 0, 4, 1, 2, 5]
            .iter()
            .map(|&idx| Workout {
                id: 100 + idx,
                order_index: idx,
                mesocycle_id: None,
                name: None,
            })
            .collect();
        AppliedPlan {
            id: 1,
            plan_id: 10,
            current_workout_index: cursor,
            workouts,
        }
    }

    fn ids(workouts: &[&Workout]) -> Vec<i64> {
        workouts.iter().map(|w| w.id).collect()
    }

    #[test]
    fn test_anchor_index() {
        assert_eq!(anchor_index(3, Anchor::Current, 0), 3);
        assert_eq!(anchor_index(3, Anchor::Previous, 0), 2);
        assert_eq!(anchor_index(3, Anchor::Current, 2), 5);
        assert_eq!(anchor_index(3, Anchor::Previous, 1), 3);
    }

    #[test]
    fn test_targets_from_cursor() {
        let p = plan(2);
        let selector = WorkoutSelector::new(&p, Anchor::Current, 0);
        assert_eq!(ids(&selector.targets(2)), vec![102, 103]);
        assert_eq!(ids(&selector.targets(10)), vec![102, 103, 104, 105]);
    }

    #[test]
    fn test_previous_anchor_includes_last_workout() {
        let p = plan(2);
        let selector = WorkoutSelector::new(&p, Anchor::Previous, 0);
        assert_eq!(ids(&selector.targets(1)), vec![101]);
    }

    #[test]
    fn test_window_strictly_before_anchor() {
        let p = plan(3);
        let selector = WorkoutSelector::new(&p, Anchor::Current, 0);
        assert_eq!(ids(&selector.window(2).unwrap()), vec![101, 102]);
        assert_eq!(ids(&selector.window(3).unwrap()), vec![100, 101, 102]);
    }

    #[test]
    fn test_short_window_is_none() {
        let p = plan(2);
        let selector = WorkoutSelector::new(&p, Anchor::Current, 0);
        assert!(selector.window(3).is_none());
        assert!(selector.window(0).is_none());
    }

    #[test]
    fn test_cursor_past_end_has_no_targets() {
        let p = plan(9);
        let selector = WorkoutSelector::new(&p, Anchor::Current, 0);
        assert!(selector.targets(2).is_empty());
    }
}

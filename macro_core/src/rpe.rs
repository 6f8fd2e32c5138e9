//! RPE lookup: converting between reps, effort and intensity.
//!
//! The built-in chart is the usual reps-in-reserve table: a set of `reps`
//! at RPE `r` sits at the same %1RM as `reps + (10 - r)` reps at RPE 10.

use once_cell::sync::Lazy;

/// Lookup service relating reps, RPE and intensity (% of 1RM)
pub trait RpeLookup: Send + Sync {
    /// Intensity for performing `reps` at `rpe`, `None` when off the chart
    fn intensity_for(&self, reps: f64, rpe: f64) -> Option<f64>;

    /// Reps achievable at `intensity` for `rpe`, `None` when off the chart
    fn reps_for(&self, intensity: f64, rpe: f64) -> Option<f64>;
}

const MIN_RPE: f64 = 6.0;
const MAX_RPE: f64 = 10.0;
const MAX_REPS: u32 = 12;

/// %1RM by effective reps at RPE 10, in half-rep steps starting at 1
const EFFECTIVE_REPS_CURVE: [f64; 31] = [
    100.0, 97.8, 95.5, 93.9, 92.2, 90.7, 89.2, 87.8, 86.3, 85.0, 83.7, 82.4, 81.1, 79.9, 78.6,
    77.4, 76.2, 75.1, 73.9, 72.3, 70.7, 69.4, 68.0, 66.7, 65.3, 64.0, 62.6, 61.3, 59.9, 58.6,
    57.4,
];

static STANDARD_CHART: Lazy<RpeChart> = Lazy::new(RpeChart::build_standard);

/// Table-driven RPE chart for reps 1-12 and RPE 6-10
#[derive(Clone, Debug)]
pub struct RpeChart {
    /// rows[rpe_step][reps - 1], rpe_step 0 = RPE 6, 8 = RPE 10
    rows: Vec<Vec<f64>>,
}

impl RpeChart {
    /// Shared instance of the standard chart
    pub fn standard() -> &'static RpeChart {
        &STANDARD_CHART
    }

    fn build_standard() -> Self {
        let rows = (0..=8)
            .map(|step| {
                let rpe = MIN_RPE + step as f64 * 0.5;
                (1..=MAX_REPS)
                    .map(|reps| {
                        let effective = reps as f64 + MAX_RPE - rpe - 1.0;
                        let half_steps = (effective * 2.0).round() as usize;
                        EFFECTIVE_REPS_CURVE[half_steps]
                    })
                    .collect()
            })
            .collect();
        RpeChart { rows }
    }

    /// RPE clamped to the chart and snapped to the nearest half step
    fn row(&self, rpe: f64) -> Option<&[f64]> {
        if !rpe.is_finite() {
            return None;
        }
        let clamped = rpe.clamp(MIN_RPE, MAX_RPE);
        let step = ((clamped - MIN_RPE) * 2.0).round() as usize;
        self.rows.get(step).map(Vec::as_slice)
    }
}

impl RpeLookup for RpeChart {
    fn intensity_for(&self, reps: f64, rpe: f64) -> Option<f64> {
        if !reps.is_finite() {
            return None;
        }
        let reps = reps.round();
        if reps < 1.0 || reps > MAX_REPS as f64 {
            return None;
        }
        let row = self.row(rpe)?;
        row.get(reps as usize - 1).copied()
    }

    fn reps_for(&self, intensity: f64, rpe: f64) -> Option<f64> {
        if !intensity.is_finite() {
            return None;
        }
        let row = self.row(rpe)?;
        // Rows descend with reps; the last entry still at or above the
        // requested intensity is the rep count. Above the ceiling -> 1 rep,
        // below the floor -> the last row entry.
        let reps = row
            .iter()
            .rposition(|&pct| pct >= intensity)
            .map(|idx| idx + 1)
            .unwrap_or(1);
        Some(reps as f64)
    }
}

//! Collaborator interfaces consumed by the engine.
//!
//! Plans, workout metrics, exercise instances and the exercise catalog are
//! owned by other services. The engine only sees them through these
//! traits, stored as `Arc<dyn ...>` so one backend can serve several roles.

use crate::catalog::CatalogEntry;
use crate::types::{AppliedPlan, ExerciseInstance, MacroRule, PlanChange, SetRecord, WorkoutDetail};
use crate::Result;
use async_trait::async_trait;

/// Read access to applied plans and the macros attached to their template
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// `Ok(None)` when the applied plan does not exist
    async fn applied_plan(&self, applied_plan_id: i64) -> Result<Option<AppliedPlan>>;

    /// Every macro attached to the template plan, active or not
    async fn macros(&self, plan_id: i64) -> Result<Vec<MacroRule>>;
}

/// Per-workout signals: readiness, session effort, planned vs. actual sets
#[async_trait]
pub trait MetricProvider: Send + Sync {
    async fn workout_detail(&self, workout_id: i64) -> Result<Option<WorkoutDetail>>;
}

/// Planned-set storage, addressed by workout and exercise
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn exercise_instances(&self, workout_id: i64) -> Result<Vec<ExerciseInstance>>;

    /// Replace the full set list of one exercise instance in a single write
    async fn write_sets(&self, workout_id: i64, exercise_id: i64, sets: &[SetRecord]) -> Result<()>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>>;
}

/// Executes structural plan changes
#[async_trait]
pub trait PlanEditor: Send + Sync {
    async fn execute(&self, change: &PlanChange) -> Result<()>;
}

// Compile-time assertion: every collaborator must be usable as `dyn`.
const _: () = {
    fn _assert_object_safe(
        _: &dyn PlanStore,
        _: &dyn MetricProvider,
        _: &dyn InstanceStore,
        _: &dyn CatalogSource,
        _: &dyn PlanEditor,
    ) {
    }
};

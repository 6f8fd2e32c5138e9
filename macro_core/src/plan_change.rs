//! Plan-change building for structural actions.

use crate::types::{Action, ActionType, AdjustMode, MesocycleSource, PlanChange};

/// Build the plan changes requested by one macro's action
///
/// Only `Inject_Mesocycle` produces changes. Nothing is emitted when no
/// workout matched or when the mode's required id is absent.
pub fn build_plan_changes(
    macro_id: i64,
    applied_plan_id: i64,
    action: &Action,
    matched_workouts: &[i64],
) -> Vec<PlanChange> {
    if action.kind != ActionType::InjectMesocycle || matched_workouts.is_empty() {
        return Vec::new();
    }

    let params = &action.params;
    let source = match params.mode {
        Some(AdjustMode::ByTemplate) => params
            .template_id
            .map(|template_id| MesocycleSource::ByTemplate { template_id }),
        Some(AdjustMode::ByExisting) => params
            .source_mesocycle_id
            .map(|source_mesocycle_id| MesocycleSource::ByExisting { source_mesocycle_id }),
        _ => None,
    };

    let Some(source) = source else {
        tracing::debug!(
            "Macro {}: Inject_Mesocycle params insufficient for mode {:?}",
            macro_id,
            params.mode
        );
        return Vec::new();
    };

    vec![PlanChange {
        macro_id,
        applied_plan_id,
        source,
        placement: params.placement.clone(),
        on_conflict: params.on_conflict.clone(),
        matched_workouts: matched_workouts.to_vec(),
    }]
}

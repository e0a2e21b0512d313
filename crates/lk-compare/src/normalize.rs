//! Strip engine-assigned identifiers before comparing observations.
//!
//! Unit tags are handed out by each engine process independently, so the
//! same unit has a different tag in every instance. Orders and raw unit
//! commands reference units by tag too. All of these are cleared; the rest
//! of the observation is left untouched.

use lk_engine::ResponseObservation;

/// Clear every non-deterministic identifier in `obs`. Idempotent.
pub fn clear_non_deterministic_fields(obs: &mut ResponseObservation) {
    if let Some(raw) = obs.observation.raw_data.as_mut() {
        for unit in &mut raw.units {
            unit.tag = None;
            for order in &mut unit.orders {
                order.target_unit_tag = None;
            }
        }
    }

    for action in &mut obs.actions {
        if let Some(cmd) = action
            .action_raw
            .as_mut()
            .and_then(|raw| raw.unit_command.as_mut())
        {
            cmd.target_unit_tag = None;
            cmd.unit_tags.clear();
        }
    }
}

//! Subtask validation.
//!
//! Subtasks failing a check are dropped, never silently patched; the
//! only automatic corrections are formatting normalizations (confidence
//! clamping, id uniquification by suffixing).

use std::collections::{HashMap, HashSet};

use mando_catalog::ToolActionRegistry;
use mando_dialog::normalize::validate_value;
use mando_domain::entity::EntityType;
use mando_domain::subtask::Subtask;

const MAX_DESCRIPTION_CHARS: usize = 500;

/// Validate a decomposition batch against the action registry.
///
/// Checks per subtask: the action exists; required arguments are present
/// and well-typed; values whose parameter names map to entity types pass
/// the per-type range rules; dependency references stay within the
/// batch; the description is non-empty and bounded. Confidence clamps to
/// `[0, 1]` and duplicate ids uniquify by suffixing.
pub fn validate_batch(subtasks: Vec<Subtask>, actions: &ToolActionRegistry) -> Vec<Subtask> {
    // Ids present in the incoming batch (dependency references may point
    // at subtasks that themselves get dropped — that drops the referrer
    // too, checked after the per-subtask pass).
    let mut valid: Vec<Subtask> = Vec::with_capacity(subtasks.len());

    for mut subtask in subtasks {
        let Some(action) = actions.get(&subtask.action_id) else {
            tracing::debug!(
                subtask = %subtask.subtask_id,
                action = %subtask.action_id,
                "dropping subtask: unknown action"
            );
            continue;
        };

        let issues = action.validate_args(&subtask.entities);
        if !issues.is_empty() {
            tracing::debug!(
                subtask = %subtask.subtask_id,
                issues = issues.len(),
                "dropping subtask: argument validation failed"
            );
            continue;
        }

        if !entity_ranges_ok(&subtask) {
            continue;
        }

        if subtask.description.trim().is_empty()
            || subtask.description.chars().count() > MAX_DESCRIPTION_CHARS
        {
            tracing::debug!(
                subtask = %subtask.subtask_id,
                "dropping subtask: bad description"
            );
            continue;
        }

        // Formatting corrections only.
        subtask.confidence = subtask.confidence.clamp(0.0, 1.0);

        valid.push(subtask);
    }

    // Dependencies must reference surviving subtasks of the same batch.
    let surviving: HashSet<String> = valid.iter().map(|s| s.subtask_id.clone()).collect();
    let mut resolved: Vec<Subtask> = Vec::with_capacity(valid.len());
    for subtask in valid {
        if subtask.dependencies.iter().all(|d| surviving.contains(d)) {
            resolved.push(subtask);
        } else {
            tracing::debug!(
                subtask = %subtask.subtask_id,
                "dropping subtask: dangling dependency reference"
            );
        }
    }

    uniquify_ids(&mut resolved);
    resolved
}

/// Per-type range rules for arguments whose names map to entity types.
fn entity_ranges_ok(subtask: &Subtask) -> bool {
    for (name, value) in &subtask.entities {
        let Some(entity_type) = EntityType::for_slot(name) else {
            continue;
        };
        let Some(text) = value.as_str() else {
            continue;
        };
        if validate_value(entity_type, text).is_err() {
            tracing::debug!(
                subtask = %subtask.subtask_id,
                param = %name,
                value = %text,
                "dropping subtask: value out of range"
            );
            return false;
        }
    }
    true
}

/// Uniquify duplicate subtask ids by suffixing `-2`, `-3`, …
///
/// Dependency references keep pointing at the first occurrence, which
/// retains the original id.
fn uniquify_ids(subtasks: &mut [Subtask]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for subtask in subtasks.iter_mut() {
        let count = seen.entry(subtask.subtask_id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            subtask.subtask_id = format!("{}-{}", subtask.subtask_id, *count);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

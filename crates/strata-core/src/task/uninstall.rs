use super::{TaskContext, TaskOutcome, flush_if_dirty};
use crate::error::ControllerError;
use crate::types::ResourceId;

/// Remove a resource from the runtime and forget it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallTask {
    pub id: ResourceId,
}

impl UninstallTask {
    pub fn new(id: ResourceId) -> Self {
        Self { id }
    }

    pub fn execute(&self, ctx: &mut TaskContext) -> Result<TaskOutcome, ControllerError> {
        if let Some(higher) = ctx.installed_higher_priority(&self.id) {
            tracing::info!(
                id = %self.id,
                overridden_by = %higher,
                "skipping uninstall, a higher-priority resource is installed"
            );
            return Ok(TaskOutcome::Skipped {
                overridden_by: higher,
            });
        }

        let result = uninstall_recorded(ctx, &self.id);
        flush_if_dirty(ctx)?;
        result
    }
}

/// Uninstall protocol without the override check.
///
/// Used directly when a higher-priority resource replaces `id`.
pub(super) fn uninstall_recorded(
    ctx: &mut TaskContext,
    id: &ResourceId,
) -> Result<TaskOutcome, ControllerError> {
    let Some(record) = ctx.state.get(id).cloned() else {
        tracing::debug!(id = %id, "nothing recorded, uninstall is a no-op");
        return Ok(TaskOutcome::NoOp);
    };

    let processor_id = record.processor.clone().unwrap_or_default();
    let Some(processor) = ctx.processors.get(&processor_id) else {
        tracing::warn!(
            id = %id,
            processor = %processor_id,
            "recorded processor is not registered, keeping record"
        );
        return Ok(TaskOutcome::Pending);
    };

    processor
        .uninstall(id, &record)
        .map_err(|source| ControllerError::Uninstall {
            id: id.clone(),
            source,
        })?;
    ctx.state.remove(id);
    tracing::info!(id = %id, processor = %processor_id, "uninstalled");
    Ok(TaskOutcome::Uninstalled)
}

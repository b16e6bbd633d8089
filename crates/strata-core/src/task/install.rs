use super::uninstall::uninstall_recorded;
use super::{TaskContext, TaskOutcome, flush_if_dirty};
use crate::error::ControllerError;
use crate::processor::InstallStatus;
use crate::state::ResourceRecord;
use crate::types::{Payload, ResourceId};

/// Install or update one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTask {
    pub id: ResourceId,
    pub payload: Payload,
}

impl InstallTask {
    pub fn new(id: ResourceId, payload: Payload) -> Self {
        Self { id, payload }
    }

    pub fn execute(&self, ctx: &mut TaskContext) -> Result<TaskOutcome, ControllerError> {
        let result = self.run(ctx);
        flush_if_dirty(ctx)?;
        result
    }

    fn run(&self, ctx: &mut TaskContext) -> Result<TaskOutcome, ControllerError> {
        let id = &self.id;

        if let Some(higher) = ctx.installed_higher_priority(id) {
            tracing::info!(
                id = %id,
                overridden_by = %higher,
                "not installing, a higher-priority resource is installed"
            );
            return Ok(TaskOutcome::Skipped {
                overridden_by: higher,
            });
        }

        for lower in ctx.rules.lower_priority_of(id) {
            if ctx.state.contains(&lower) {
                tracing::info!(id = %id, lower = %lower, "replacing lower-priority resource");
                // Both must never be recorded at once
                if uninstall_recorded(ctx, &lower)? == TaskOutcome::Pending {
                    tracing::warn!(
                        id = %id,
                        lower = %lower,
                        "lower-priority resource cannot be removed yet, leaving install pending"
                    );
                    return Ok(TaskOutcome::Pending);
                }
            }
        }

        let Some(processor) = ctx.processors.find_for(id, &self.payload) else {
            tracing::debug!(id = %id, "no processor accepts this resource, leaving it pending");
            return Ok(TaskOutcome::Pending);
        };
        let processor_id = processor.id();

        let mut record = ctx
            .state
            .get(id)
            .cloned()
            .unwrap_or_else(|| ResourceRecord::new(id.clone()));

        let status = processor
            .install_or_update(id, &mut record, &self.payload)
            .map_err(|source| ControllerError::Install {
                id: id.clone(),
                source,
            })?;

        match status {
            InstallStatus::Ignored => {
                tracing::debug!(id = %id, processor = processor_id, "already up to date");
                Ok(TaskOutcome::Ignored)
            }
            InstallStatus::Installed | InstallStatus::Updated => {
                record.digest = Some(self.payload.digest.clone());
                record.processor = Some(processor_id.to_string());
                record.installed = true;
                ctx.state.put(id.clone(), record);

                let outcome = if status == InstallStatus::Installed {
                    TaskOutcome::Installed
                } else {
                    TaskOutcome::Updated
                };
                tracing::info!(
                    id = %id,
                    processor = processor_id,
                    digest = %self.payload.digest,
                    outcome = ?outcome,
                    "resource installed"
                );
                Ok(outcome)
            }
        }
    }
}

//! Install and uninstall tasks: the atomic units of work.
//!
//! Tasks only run inside the controller's worker context, which owns the
//! state store. Each task flushes the state before returning, including when
//! the processor failed after earlier state changes (lower-priority removals).

mod install;
mod uninstall;

use serde::Serialize;

use crate::overrides::OverrideRules;
use crate::processor::ProcessorRegistry;
use crate::state::StateStore;
use crate::types::ResourceId;

pub use install::InstallTask;
pub use uninstall::UninstallTask;

/// Everything a task needs: rules, processors and the state it mutates.
#[derive(Debug)]
pub struct TaskContext {
    pub rules: OverrideRules,
    pub processors: ProcessorRegistry,
    pub state: StateStore,
}

impl TaskContext {
    pub fn new(rules: OverrideRules, processors: ProcessorRegistry, state: StateStore) -> Self {
        Self {
            rules,
            processors,
            state,
        }
    }

    /// First id outranking `id` that is currently recorded.
    pub fn installed_higher_priority(&self, id: &ResourceId) -> Option<ResourceId> {
        self.rules
            .higher_priority_of(id)
            .into_iter()
            .find(|higher| self.state.contains(higher))
    }
}

/// What a task did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum TaskOutcome {
    Installed,
    Updated,
    /// The runtime already had this content
    Ignored,
    /// A higher-priority resource is installed
    Skipped { overridden_by: ResourceId },
    Uninstalled,
    /// Nothing recorded for this id
    NoOp,
    /// No processor available; retried on the next discovery
    Pending,
}

impl TaskOutcome {
    /// True if the runtime or the state store changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Installed | TaskOutcome::Updated | TaskOutcome::Uninstalled
        )
    }
}

/// Flush the state if the task changed it.
fn flush_if_dirty(ctx: &mut TaskContext) -> Result<(), crate::error::StateError> {
    if ctx.state.is_dirty() {
        ctx.state.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::{ControllerError, ProcessorError};
    use crate::overrides::OverrideRule;
    use crate::processor::{InstallStatus, ResourceProcessor};
    use crate::state::ResourceRecord;
    use crate::types::Payload;
    use tempfile::TempDir;

    #[derive(Debug, Default, Clone)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().expect("calls lock").push(call);
        }

        fn all(&self) -> Vec<String> {
            self.0.lock().expect("calls lock").clone()
        }
    }

    #[derive(Debug)]
    struct Recording {
        calls: Calls,
    }

    impl ResourceProcessor for Recording {
        fn id(&self) -> &'static str {
            "recording"
        }

        fn can_handle(&self, id: &ResourceId, _payload: &Payload) -> bool {
            id.extension().as_deref() == Some("jar")
        }

        fn install_or_update(
            &self,
            id: &ResourceId,
            record: &mut ResourceRecord,
            payload: &Payload,
        ) -> Result<InstallStatus, ProcessorError> {
            if record.has_digest(&payload.digest) {
                return Ok(InstallStatus::Ignored);
            }
            if payload.data == b"malformed" {
                return Err(ProcessorError::Format {
                    id: id.clone(),
                    message: "bad".to_string(),
                });
            }
            self.calls.push(format!("install {}", id));
            Ok(if record.installed {
                InstallStatus::Updated
            } else {
                InstallStatus::Installed
            })
        }

        fn uninstall(&self, id: &ResourceId, _record: &ResourceRecord) -> Result<(), ProcessorError> {
            self.calls.push(format!("uninstall {}", id));
            Ok(())
        }
    }

    fn context(tmp: &TempDir, rules: Vec<OverrideRule>) -> (TaskContext, Calls) {
        let calls = Calls::default();
        let mut processors = ProcessorRegistry::new();
        processors.register(Box::new(Recording {
            calls: calls.clone(),
        }));
        let state = StateStore::in_dir(tmp.path()).expect("state should open");
        (
            TaskContext::new(OverrideRules::new(rules), processors, state),
            calls,
        )
    }

    fn install(ctx: &mut TaskContext, id: &str, data: &[u8]) -> TaskOutcome {
        InstallTask::new(ResourceId::new(id), Payload::new(data.to_vec()))
            .execute(ctx)
            .expect("install task should succeed")
    }

    #[test]
    fn test_install_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, calls) = context(&tmp, Vec::new());

        assert_eq!(install(&mut ctx, "/apps/install/a.jar", b"1"), TaskOutcome::Installed);
        assert_eq!(install(&mut ctx, "/apps/install/a.jar", b"1"), TaskOutcome::Ignored);
        assert_eq!(install(&mut ctx, "/apps/install/a.jar", b"2"), TaskOutcome::Updated);
        assert_eq!(ctx.state.len(), 1);
        assert_eq!(calls.all().len(), 2);
    }

    #[test]
    fn test_install_flushes_state() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, _calls) = context(&tmp, Vec::new());
        install(&mut ctx, "/apps/install/a.jar", b"1");
        assert!(!ctx.state.is_dirty());

        let reopened = StateStore::in_dir(tmp.path()).expect("state should reopen");
        let record = reopened
            .get(&ResourceId::new("/apps/install/a.jar"))
            .expect("record should be persisted");
        assert_eq!(record.processor.as_deref(), Some("recording"));
        assert!(record.installed);
    }

    #[test]
    fn test_no_processor_leaves_resource_pending() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, calls) = context(&tmp, Vec::new());
        assert_eq!(install(&mut ctx, "/apps/install/notes.txt", b"x"), TaskOutcome::Pending);
        assert!(ctx.state.is_empty());
        assert!(calls.all().is_empty());
    }

    #[test]
    fn test_higher_priority_replaces_lower() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, calls) = context(&tmp, vec![OverrideRule::new("/apps", "/libs")]);

        install(&mut ctx, "/libs/install/a.jar", b"base");
        assert_eq!(install(&mut ctx, "/apps/install/a.jar", b"over"), TaskOutcome::Installed);

        assert_eq!(ctx.state.ids(), vec![ResourceId::new("/apps/install/a.jar")]);
        assert_eq!(
            calls.all(),
            vec![
                "install /libs/install/a.jar",
                "uninstall /libs/install/a.jar",
                "install /apps/install/a.jar",
            ]
        );
    }

    #[test]
    fn test_lower_priority_is_skipped() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, _calls) = context(&tmp, vec![OverrideRule::new("/apps", "/libs")]);

        install(&mut ctx, "/apps/install/a.jar", b"over");
        assert_eq!(
            install(&mut ctx, "/libs/install/a.jar", b"base"),
            TaskOutcome::Skipped {
                overridden_by: ResourceId::new("/apps/install/a.jar")
            }
        );
        assert_eq!(ctx.state.len(), 1);
    }

    #[test]
    fn test_uninstall_round_trip() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, calls) = context(&tmp, Vec::new());
        let id = ResourceId::new("/apps/install/a.jar");
        install(&mut ctx, id.as_str(), b"1");

        let task = UninstallTask::new(id.clone());
        assert_eq!(task.execute(&mut ctx).expect("uninstall should succeed"), TaskOutcome::Uninstalled);
        assert_eq!(task.execute(&mut ctx).expect("uninstall should succeed"), TaskOutcome::NoOp);
        assert!(ctx.state.is_empty());
        assert_eq!(
            calls.all().iter().filter(|c| c.starts_with("uninstall")).count(),
            1
        );
    }

    #[test]
    fn test_uninstall_with_unregistered_processor_stays_pending() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, _calls) = context(&tmp, Vec::new());
        let id = ResourceId::new("/apps/install/a.jar");
        let mut record = ResourceRecord::new(id.clone());
        record.installed = true;
        record.processor = Some("gone".to_string());
        ctx.state.put(id.clone(), record);

        let outcome = UninstallTask::new(id.clone())
            .execute(&mut ctx)
            .expect("uninstall should not fail");
        assert_eq!(outcome, TaskOutcome::Pending);
        assert!(ctx.state.contains(&id));
    }

    #[test]
    fn test_install_waits_while_lower_priority_cannot_be_removed() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, calls) = context(&tmp, vec![OverrideRule::new("/apps", "/libs")]);
        let lower = ResourceId::new("/libs/x.jar");
        let mut record = ResourceRecord::new(lower.clone());
        record.installed = true;
        record.processor = Some("gone".to_string());
        ctx.state.put(lower.clone(), record);

        assert_eq!(install(&mut ctx, "/apps/x.jar", b"over"), TaskOutcome::Pending);
        assert_eq!(ctx.state.ids(), vec![lower]);
        assert!(calls.all().is_empty());
    }

    #[test]
    fn test_processor_format_error_is_wrapped() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let (mut ctx, _calls) = context(&tmp, Vec::new());
        let err = InstallTask::new(
            ResourceId::new("/apps/install/a.jar"),
            Payload::new(b"malformed".to_vec()),
        )
        .execute(&mut ctx)
        .expect_err("install must fail");
        assert!(matches!(err, ControllerError::Install { .. }));
        assert!(err.is_recoverable());
        assert!(ctx.state.is_empty());
    }
}

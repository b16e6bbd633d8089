//! Observer integration tests
//!
//! Runs the watch loop against an in-memory content store:
//! - Folder discovery, change detection and idle scans
//! - Removal of resources and whole folders
//! - Startup reconciliation (deleted nodes, changed folder pattern)
//! - The background observer thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use strata_core::content::{ContentStore, MemoryStore, Node};
use strata_core::controller::Controller;
use strata_core::error::ProcessorError;
use strata_core::overrides::OverrideRules;
use strata_core::processor::{InstallStatus, ProcessorRegistry, ResourceProcessor};
use strata_core::state::{ResourceRecord, StateStore};
use strata_core::task::{TaskContext, TaskOutcome};
use strata_core::types::{Payload, ResourceId};
use strata_core::watch::{FileFilter, FolderFilter, RepositoryObserver};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Where the artifact processor deploys `/apps/demo/install/app.jar`
const DEPLOYED_APP: &str = "runtime/artifacts/apps/demo/install/app.jar";

const INSTALL_PATTERN: &str = ".*/install$";

fn new_controller(temp: &TempDir) -> Arc<Controller> {
    let processors = ProcessorRegistry::with_default_processors(
        &temp.path().join("runtime"),
        &["jar".to_string()],
    );
    let state = StateStore::in_dir(&temp.path().join("state")).expect("state should open");
    Arc::new(Controller::new(TaskContext::new(
        OverrideRules::empty(),
        processors,
        state,
    )))
}

/// Installs anything, but fails while its runtime is marked offline.
#[derive(Debug)]
struct SwitchedRuntime {
    offline: Arc<AtomicBool>,
}

impl SwitchedRuntime {
    fn check(&self) -> Result<(), ProcessorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProcessorError::Failed("runtime offline".to_string()));
        }
        Ok(())
    }
}

impl ResourceProcessor for SwitchedRuntime {
    fn id(&self) -> &'static str {
        "switched"
    }

    fn can_handle(&self, _id: &ResourceId, _payload: &Payload) -> bool {
        true
    }

    fn install_or_update(
        &self,
        _id: &ResourceId,
        record: &mut ResourceRecord,
        payload: &Payload,
    ) -> Result<InstallStatus, ProcessorError> {
        self.check()?;
        if record.has_digest(&payload.digest) {
            return Ok(InstallStatus::Ignored);
        }
        Ok(InstallStatus::Installed)
    }

    fn uninstall(&self, _id: &ResourceId, _record: &ResourceRecord) -> Result<(), ProcessorError> {
        self.check()
    }
}

fn switched_controller(temp: &TempDir, offline: &Arc<AtomicBool>) -> Arc<Controller> {
    let mut processors = ProcessorRegistry::new();
    processors.register(Box::new(SwitchedRuntime {
        offline: offline.clone(),
    }));
    let state = StateStore::in_dir(&temp.path().join("state")).expect("state should open");
    Arc::new(Controller::new(TaskContext::new(
        OverrideRules::empty(),
        processors,
        state,
    )))
}

fn new_observer(
    store: &Arc<MemoryStore>,
    controller: &Arc<Controller>,
    pattern: &str,
    run_modes: &[&str],
) -> RepositoryObserver {
    let modes: Vec<String> = run_modes.iter().map(|m| m.to_string()).collect();
    RepositoryObserver::new(
        store.clone(),
        controller.clone(),
        vec!["/libs".to_string(), "/apps".to_string()],
        FolderFilter::new(pattern, &modes).expect("folder pattern should compile"),
        FileFilter::new("^[^.]").expect("file pattern should compile"),
    )
}

fn insert_file(store: &MemoryStore, path: &str, data: &str) {
    store
        .insert(path, Node::file(data.as_bytes().to_vec()))
        .expect("insert should succeed");
}

fn remove(store: &MemoryStore, path: &str) {
    store.remove(path).expect("remove should stage");
    store.commit().expect("commit should succeed");
}

fn id(path: &str) -> ResourceId {
    ResourceId::new(path)
}

// =============================================================================
// Change detection
// =============================================================================

#[test]
fn test_new_resource_is_installed_and_idle_scans_are_empty() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    let first = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(
        first.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Installed)
    );
    assert_eq!(observer.watched_folders(), vec!["/apps/demo/install"]);

    let second = observer.run_one_cycle().expect("cycle should succeed");
    let third = observer.run_one_cycle().expect("cycle should succeed");
    assert!(second.is_empty());
    assert!(third.is_empty());
}

#[test]
fn test_changed_resource_is_updated() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    observer.run_one_cycle().expect("cycle should succeed");

    insert_file(&store, "/apps/demo/install/app.jar", "v2");
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Updated)
    );
    assert_eq!(
        std::fs::read(temp.path().join(DEPLOYED_APP)).expect("artifact exists"),
        b"v2"
    );
}

#[test]
fn test_removed_resource_is_uninstalled() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");
    insert_file(&store, "/apps/demo/install/other.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    observer.run_one_cycle().expect("cycle should succeed");

    remove(&store, "/apps/demo/install/app.jar");
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Uninstalled)
    );
    assert_eq!(
        controller.installed_ids(),
        vec![id("/apps/demo/install/other.jar")]
    );
    assert!(!temp.path().join(DEPLOYED_APP).exists());
}

#[test]
fn test_removed_folder_uninstalls_everything_it_held() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/a.jar", "a");
    insert_file(&store, "/apps/demo/install/b.jar", "b");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(controller.installed_ids().len(), 2);

    remove(&store, "/apps/demo");
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(report.changed(), 2);
    assert!(controller.installed_ids().is_empty());
    assert!(observer.watched_folders().is_empty());
}

#[test]
fn test_hidden_children_and_subfolders_are_not_resources() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/.hidden.jar", "x");
    store
        .insert("/apps/demo/install/nested", Node::folder())
        .expect("insert should succeed");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert!(report.is_empty());
    assert!(controller.installed_ids().is_empty());
}

#[test]
fn test_property_node_is_installed_as_configuration() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    store
        .insert(
            "/libs/core/install/org.example.Service",
            Node::structured(Default::default()).with_property("enabled", true),
        )
        .expect("insert should succeed");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(report.changed(), 1);

    let written: serde_json::Value = serde_json::from_slice(
        &std::fs::read(temp.path().join("runtime/configs/org.example.Service.json"))
            .expect("configuration should be written"),
    )
    .expect("configuration should be JSON");
    assert_eq!(written["properties"]["enabled"], true);
}

#[test]
fn test_run_mode_folders_follow_active_modes() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install.dev/dev.jar", "d");
    insert_file(&store, "/apps/demo/install.prod/prod.jar", "p");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &["dev"]);
    observer.run_one_cycle().expect("cycle should succeed");

    assert_eq!(
        controller.installed_ids(),
        vec![id("/apps/demo/install.dev/dev.jar")]
    );
}

#[test]
fn test_store_outage_fails_the_cycle_and_recovers() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    store.set_unavailable(Some("maintenance"));
    assert!(observer.run_one_cycle().is_err());

    store.set_unavailable(None);
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(report.changed(), 1);
}

#[test]
fn test_failed_install_is_retried_until_the_runtime_recovers() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let offline = Arc::new(AtomicBool::new(true));
    let controller = switched_controller(&temp, &offline);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    let err = observer.run_one_cycle().expect_err("cycle must fail while offline");
    assert_eq!(err.resource_id(), Some(&id("/apps/demo/install/app.jar")));
    // Nothing changed in the folder, the queued task alone carries the retry
    assert!(observer.run_one_cycle().is_err());
    assert!(controller.installed_ids().is_empty());

    offline.store(false, Ordering::SeqCst);
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Installed)
    );
    assert_eq!(controller.installed_ids(), vec![id("/apps/demo/install/app.jar")]);
    assert!(observer.run_one_cycle().expect("cycle should succeed").is_empty());
}

#[test]
fn test_failed_uninstall_is_retried_until_the_runtime_recovers() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let offline = Arc::new(AtomicBool::new(false));
    let controller = switched_controller(&temp, &offline);
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    observer.run_one_cycle().expect("cycle should succeed");

    offline.store(true, Ordering::SeqCst);
    remove(&store, "/apps/demo/install/app.jar");
    assert!(observer.run_one_cycle().is_err());
    assert_eq!(controller.installed_ids(), vec![id("/apps/demo/install/app.jar")]);

    offline.store(false, Ordering::SeqCst);
    let report = observer.run_one_cycle().expect("cycle should succeed");
    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Uninstalled)
    );
    assert!(controller.installed_ids().is_empty());
}

// =============================================================================
// Startup reconciliation
// =============================================================================

#[test]
fn test_startup_uninstalls_resources_deleted_while_stopped() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    insert_file(&store, "/apps/demo/install/app.jar", "v1");
    {
        let controller = new_controller(&temp);
        let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
        observer.startup().expect("startup should succeed");
        observer.run_one_cycle().expect("cycle should succeed");
    }

    remove(&store, "/apps/demo/install/app.jar");

    let controller = new_controller(&temp);
    let mut observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);
    let report = observer.startup().expect("startup should succeed");
    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Uninstalled)
    );
    assert!(controller.installed_ids().is_empty());
}

#[test]
fn test_startup_uninstalls_folders_excluded_by_new_pattern() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    insert_file(&store, "/apps/demo/install/app.jar", "v1");
    insert_file(&store, "/apps/demo/deploy/keep.jar", "k");
    {
        let controller = new_controller(&temp);
        let mut observer = new_observer(&store, &controller, ".*/(install|deploy)$", &[]);
        observer.startup().expect("startup should succeed");
        observer.run_one_cycle().expect("cycle should succeed");
        assert_eq!(controller.installed_ids().len(), 2);
    }

    let controller = new_controller(&temp);
    let mut observer = new_observer(&store, &controller, ".*/deploy$", &[]);
    let report = observer.startup().expect("startup should succeed");

    assert_eq!(
        report.outcome_of(&id("/apps/demo/install/app.jar")),
        Some(&TaskOutcome::Uninstalled)
    );
    assert_eq!(
        controller.installed_ids(),
        vec![id("/apps/demo/deploy/keep.jar")]
    );
}

// =============================================================================
// Background thread
// =============================================================================

#[test]
fn test_spawned_observer_installs_and_stops() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let controller = new_controller(&temp);
    let observer = new_observer(&store, &controller, INSTALL_PATTERN, &[]);

    let handle = observer
        .spawn(Duration::from_millis(10))
        .expect("observer thread should start");
    insert_file(&store, "/apps/demo/install/app.jar", "v1");

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.installed_ids().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.stop();

    assert_eq!(
        controller.installed_ids(),
        vec![id("/apps/demo/install/app.jar")]
    );
}

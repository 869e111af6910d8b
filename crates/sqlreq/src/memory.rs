//! In-process backend for the collaborator traits.
//!
//! Keeps every artifact in memory. Useful when the engine runs embedded without
//! a host application, and as the collaborator in tests.

use crate::collab::{
    AccessSpec, ActionSpec, ArtifactId, CronSpec, MenuSpec, ModelSpec, RuleSpec,
    SchedulerCapability, SchemaCapability, UiCapability, UiViewSpec,
};
use crate::error::{RequestError, RequestResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone)]
pub struct StoredTask {
    pub spec: CronSpec,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct StoredAction {
    pub spec: ActionSpec,
    /// Current display name; changes on refresh.
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StoredMenu {
    pub spec: MenuSpec,
    pub sequence: i32,
}

#[derive(Debug, Default)]
struct Store {
    models: BTreeMap<ArtifactId, ModelSpec>,
    access: BTreeMap<ArtifactId, AccessSpec>,
    rules: BTreeMap<ArtifactId, RuleSpec>,
    tasks: BTreeMap<ArtifactId, StoredTask>,
    views: BTreeMap<ArtifactId, UiViewSpec>,
    actions: BTreeMap<ArtifactId, StoredAction>,
    menus: BTreeMap<ArtifactId, StoredMenu>,
}

/// Collaborator backend holding everything in mutex-guarded maps.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    next_id: AtomicI64,
    store: Mutex<Store>,
    failing: Mutex<HashSet<&'static str>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation (e.g. `"create_menu"`) fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        self.lock_failing().insert(operation);
    }

    pub fn models(&self) -> Vec<ModelSpec> {
        self.lock().models.values().cloned().collect()
    }

    pub fn access(&self) -> Vec<AccessSpec> {
        self.lock().access.values().cloned().collect()
    }

    pub fn rules(&self) -> Vec<RuleSpec> {
        self.lock().rules.values().cloned().collect()
    }

    pub fn task(&self, id: ArtifactId) -> Option<StoredTask> {
        self.lock().tasks.get(&id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn views(&self) -> Vec<UiViewSpec> {
        self.lock().views.values().cloned().collect()
    }

    pub fn action(&self, id: ArtifactId) -> Option<StoredAction> {
        self.lock().actions.get(&id).cloned()
    }

    pub fn action_count(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn menu(&self, id: ArtifactId) -> Option<StoredMenu> {
        self.lock().menus.get(&id).cloned()
    }

    pub fn menu_count(&self) -> usize {
        self.lock().menus.len()
    }

    fn allocate(&self) -> ArtifactId {
        ArtifactId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // Poisoning is ignored: every map update is a single insert or remove.
    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<&'static str>> {
        self.failing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard(&self, operation: &'static str) -> RequestResult<()> {
        if self.lock_failing().contains(operation) {
            return Err(RequestError::backend(format!("{operation} failed")));
        }
        Ok(())
    }
}

fn missing(kind: &str, id: ArtifactId) -> RequestError {
    RequestError::backend(format!("{kind} {id} does not exist"))
}

#[async_trait::async_trait]
impl SchemaCapability for InMemoryBackend {
    async fn create_model(&self, spec: &ModelSpec) -> RequestResult<ArtifactId> {
        self.guard("create_model")?;
        let id = self.allocate();
        self.lock().models.insert(id, spec.clone());
        Ok(id)
    }

    async fn drop_model(&self, id: ArtifactId) -> RequestResult<()> {
        self.guard("drop_model")?;
        self.lock().models.remove(&id).map(|_| ()).ok_or_else(|| missing("model", id))
    }

    async fn create_access(&self, spec: &AccessSpec) -> RequestResult<ArtifactId> {
        self.guard("create_access")?;
        let id = self.allocate();
        self.lock().access.insert(id, spec.clone());
        Ok(id)
    }

    async fn drop_access(&self, model: &str) -> RequestResult<()> {
        self.guard("drop_access")?;
        self.lock().access.retain(|_, a| a.model != model);
        Ok(())
    }

    async fn create_rule(&self, spec: &RuleSpec) -> RequestResult<ArtifactId> {
        self.guard("create_rule")?;
        let id = self.allocate();
        self.lock().rules.insert(id, spec.clone());
        Ok(id)
    }

    async fn drop_rule(&self, id: ArtifactId) -> RequestResult<()> {
        self.guard("drop_rule")?;
        self.lock().rules.remove(&id).map(|_| ()).ok_or_else(|| missing("rule", id))
    }
}

#[async_trait::async_trait]
impl SchedulerCapability for InMemoryBackend {
    async fn create_task(&self, spec: &CronSpec) -> RequestResult<ArtifactId> {
        self.guard("create_task")?;
        let id = self.allocate();
        self.lock().tasks.insert(
            id,
            StoredTask {
                spec: spec.clone(),
                active: true,
            },
        );
        Ok(id)
    }

    async fn set_task_active(&self, id: ArtifactId, active: bool) -> RequestResult<()> {
        self.guard("set_task_active")?;
        let mut store = self.lock();
        let task = store.tasks.get_mut(&id).ok_or_else(|| missing("task", id))?;
        task.active = active;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UiCapability for InMemoryBackend {
    async fn create_view(&self, spec: &UiViewSpec) -> RequestResult<ArtifactId> {
        self.guard("create_view")?;
        let id = self.allocate();
        self.lock().views.insert(id, spec.clone());
        Ok(id)
    }

    async fn delete_view(&self, id: ArtifactId) -> RequestResult<()> {
        self.guard("delete_view")?;
        self.lock().views.remove(&id).map(|_| ()).ok_or_else(|| missing("view", id))
    }

    async fn create_action(&self, spec: &ActionSpec) -> RequestResult<ArtifactId> {
        self.guard("create_action")?;
        let id = self.allocate();
        self.lock().actions.insert(
            id,
            StoredAction {
                spec: spec.clone(),
                name: spec.name.clone(),
            },
        );
        Ok(id)
    }

    async fn rename_action(&self, id: ArtifactId, name: &str) -> RequestResult<()> {
        self.guard("rename_action")?;
        let mut store = self.lock();
        let action = store.actions.get_mut(&id).ok_or_else(|| missing("action", id))?;
        action.name = name.to_string();
        Ok(())
    }

    async fn delete_action(&self, id: ArtifactId) -> RequestResult<()> {
        self.guard("delete_action")?;
        self.lock().actions.remove(&id).map(|_| ()).ok_or_else(|| missing("action", id))
    }

    async fn create_menu(&self, spec: &MenuSpec) -> RequestResult<ArtifactId> {
        self.guard("create_menu")?;
        let id = self.allocate();
        self.lock().menus.insert(
            id,
            StoredMenu {
                spec: spec.clone(),
                sequence: spec.sequence,
            },
        );
        Ok(id)
    }

    async fn set_menu_sequence(&self, id: ArtifactId, sequence: i32) -> RequestResult<()> {
        self.guard("set_menu_sequence")?;
        let mut store = self.lock();
        let menu = store.menus.get_mut(&id).ok_or_else(|| missing("menu", id))?;
        menu.sequence = sequence;
        Ok(())
    }

    async fn delete_menu(&self, id: ArtifactId) -> RequestResult<()> {
        self.guard("delete_menu")?;
        self.lock().menus.remove(&id).map(|_| ()).ok_or_else(|| missing("menu", id))
    }
}

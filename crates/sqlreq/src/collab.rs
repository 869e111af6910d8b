//! Capabilities the engine needs from the host application.
//!
//! The engine never persists models, access grants, scheduled tasks or UI
//! records itself. It describes them with the `*Spec` types below and hands them
//! to these traits, keeping the returned [`ArtifactId`]s so it can remove them
//! again on reset.

use crate::error::RequestResult;
use crate::view::{FieldType, GroupOperator, ViewKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of a record owned by a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ArtifactId(pub i64);

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFieldSpec {
    pub name: String,
    pub description: String,
    pub ttype: FieldType,
    /// Target model of a `many2one` field.
    pub relation: Option<String>,
    pub group_operator: Option<GroupOperator>,
}

/// A dynamic record type backed by the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    pub name: String,
    /// Technical model name, e.g. `x_bi_sql_view.sales`.
    pub model: String,
    pub fields: Vec<ModelFieldSpec>,
}

/// Read-only access for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessSpec {
    pub name: String,
    pub model: String,
    pub group: String,
}

/// Global row filter on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSpec {
    pub name: String,
    pub model: String,
    pub domain_force: String,
}

/// Periodic task that refreshes materialized views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronSpec {
    pub name: String,
    pub interval_days: u32,
    pub next_call: DateTime<Utc>,
    /// Entity whose refresh entry point the task calls.
    pub entity: String,
    pub target_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiViewSpec {
    pub name: String,
    pub kind: ViewKind,
    pub model: String,
    pub arch: String,
}

/// Window action opening the generated views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub model: String,
    /// Comma-separated view kinds, first one opened by default.
    pub view_mode: String,
    pub view_id: ArtifactId,
    pub search_view_id: ArtifactId,
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuSpec {
    pub name: String,
    /// External reference of the parent menu.
    pub parent: String,
    pub action: ArtifactId,
    pub sequence: i32,
}

/// Dynamic models, access grants and record rules.
#[async_trait::async_trait]
pub trait SchemaCapability: Send + Sync {
    async fn create_model(&self, spec: &ModelSpec) -> RequestResult<ArtifactId>;

    async fn drop_model(&self, id: ArtifactId) -> RequestResult<()>;

    async fn create_access(&self, spec: &AccessSpec) -> RequestResult<ArtifactId>;

    /// Remove every access grant on `model`.
    async fn drop_access(&self, model: &str) -> RequestResult<()>;

    async fn create_rule(&self, spec: &RuleSpec) -> RequestResult<ArtifactId>;

    async fn drop_rule(&self, id: ArtifactId) -> RequestResult<()>;
}

/// Scheduled tasks.
#[async_trait::async_trait]
pub trait SchedulerCapability: Send + Sync {
    async fn create_task(&self, spec: &CronSpec) -> RequestResult<ArtifactId>;

    async fn set_task_active(&self, id: ArtifactId, active: bool) -> RequestResult<()>;
}

/// Presentation views, actions and menus.
#[async_trait::async_trait]
pub trait UiCapability: Send + Sync {
    async fn create_view(&self, spec: &UiViewSpec) -> RequestResult<ArtifactId>;

    async fn delete_view(&self, id: ArtifactId) -> RequestResult<()>;

    async fn create_action(&self, spec: &ActionSpec) -> RequestResult<ArtifactId>;

    async fn rename_action(&self, id: ArtifactId, name: &str) -> RequestResult<()>;

    async fn delete_action(&self, id: ArtifactId) -> RequestResult<()>;

    async fn create_menu(&self, spec: &MenuSpec) -> RequestResult<ArtifactId>;

    async fn set_menu_sequence(&self, id: ArtifactId, sequence: i32) -> RequestResult<()>;

    async fn delete_menu(&self, id: ArtifactId) -> RequestResult<()>;
}

/// The three capabilities, borrowed for one operation.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub schema: &'a dyn SchemaCapability,
    pub scheduler: &'a dyn SchedulerCapability,
    pub ui: &'a dyn UiCapability,
}

impl<'a> Collaborators<'a> {
    pub fn new(
        schema: &'a dyn SchemaCapability,
        scheduler: &'a dyn SchedulerCapability,
        ui: &'a dyn UiCapability,
    ) -> Self {
        Self {
            schema,
            scheduler,
            ui,
        }
    }

    /// Use one backend for all three capabilities.
    pub fn from_backend<B>(backend: &'a B) -> Self
    where
        B: SchemaCapability + SchedulerCapability + UiCapability,
    {
        Self::new(backend, backend, backend)
    }
}

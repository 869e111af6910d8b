//! SQL views: requests promoted into database views with a generated model and UI.
//!
//! A [`SqlView`] extends the request lifecycle:
//!
//! ```text
//! draft -> sql_valid -> model_valid -> ui_valid
//! ```
//!
//! - `validate` probes the query and synchronizes [`ViewField`]s with its columns
//! - `create_sql_view_and_model` builds the model, access, rule, the view itself,
//!   its indexes and (materialized only) the refresh task
//! - `create_ui` builds the list/graph/pivot/search views, the action and the menu
//!
//! Resets walk the same path backwards, one state at a time.
//!
//! # Example
//!
//! ```ignore
//! use sqlreq::{Collaborators, ExecContext, InMemoryBackend, SqlRequestConfig, SqlView};
//!
//! let config = SqlRequestConfig::default();
//! let ctx = ExecContext::new(&tx, &config);
//! let backend = InMemoryBackend::new();
//! let collab = Collaborators::from_backend(&backend);
//!
//! let mut view = SqlView::new(1, "Sales", "sales", "SELECT amount AS x_amount FROM sale", &config)?;
//! view.validate(&ctx).await?;
//! view.create_sql_view_and_model(&ctx, collab).await?;
//! view.create_ui(collab, chrono::Utc::now()).await?;
//! ```

mod ddl;
mod field;
mod materialize;
mod sync;
mod ui;

#[cfg(test)]
mod tests;

pub use ddl::{create_view_sql, drop_view_sql, refresh_sql, size_sql};
pub use field::{
    FieldType, GraphType, GroupOperator, RESERVED_PREFIX, TreeVisibility, ViewField, describe,
};
pub use materialize::refresh_materialized_views;
pub use sync::{SyncReport, synchronize_fields};
pub use ui::{
    COUNT_MEASURE, ContextOverlay, ViewKind, ViewOrder, action_name, build_arch,
    computed_action_context,
};

use crate::collab::{ArtifactId, Collaborators};
use crate::config::SqlRequestConfig;
use crate::error::{RequestError, RequestResult};
use crate::ident::validate_technical_name;
use crate::request::{RequestState, SqlRequest};

/// Prefix of the database view name.
pub const VIEW_PREFIX: &str = "x_bi_sql_view_";
/// Prefix of the generated model name.
pub const MODEL_PREFIX: &str = "x_bi_sql_view.";
/// Entity type of SQL views; also the checkpoint name prefix.
pub const ENTITY: &str = "bi.sql.view";

/// Records owned by a view in the collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewArtifacts {
    pub model: Option<ArtifactId>,
    pub rule: Option<ArtifactId>,
    pub cron: Option<ArtifactId>,
    pub list_view: Option<ArtifactId>,
    pub graph_view: Option<ArtifactId>,
    pub pivot_view: Option<ArtifactId>,
    pub search_view: Option<ArtifactId>,
    pub action: Option<ArtifactId>,
    pub menu: Option<ArtifactId>,
}

impl ViewArtifacts {
    pub fn view_for(&self, kind: ViewKind) -> Option<ArtifactId> {
        match kind {
            ViewKind::List => self.list_view,
            ViewKind::Graph => self.graph_view,
            ViewKind::Pivot => self.pivot_view,
            ViewKind::Search => self.search_view,
        }
    }

    fn set_view(&mut self, kind: ViewKind, id: Option<ArtifactId>) {
        match kind {
            ViewKind::List => self.list_view = id,
            ViewKind::Graph => self.graph_view = id,
            ViewKind::Pivot => self.pivot_view = id,
            ViewKind::Search => self.search_view = id,
        }
    }
}

/// A SQL request materialized as a database view.
#[derive(Debug, Clone)]
pub struct SqlView {
    id: i64,
    request: SqlRequest,
    technical_name: String,
    view_name: String,
    model_name: String,
    is_materialized: bool,
    size: Option<String>,
    view_order: ViewOrder,
    /// Row filter applied through a global rule.
    pub domain_force: String,
    action_context: ContextOverlay,
    fields: Vec<ViewField>,
    pub parent_menu: String,
    sequence: i32,
    artifacts: ViewArtifacts,
}

impl SqlView {
    /// Create a draft view. `technical_name` must be a plain SQL identifier.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        technical_name: impl Into<String>,
        query: impl Into<String>,
        config: &SqlRequestConfig,
    ) -> RequestResult<Self> {
        let technical_name = technical_name.into();
        validate_technical_name(&technical_name, VIEW_PREFIX)?;
        Ok(Self {
            id,
            request: SqlRequest::new(ENTITY, name, query, config),
            view_name: format!("{VIEW_PREFIX}{technical_name}"),
            model_name: format!("{MODEL_PREFIX}{technical_name}"),
            technical_name,
            is_materialized: true,
            size: None,
            view_order: config.views.view_order.parse()?,
            domain_force: "[]".to_string(),
            action_context: ContextOverlay::new(),
            fields: Vec::new(),
            parent_menu: config.views.parent_menu.clone(),
            sequence: 0,
            artifacts: ViewArtifacts::default(),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.request.name
    }

    pub fn request(&self) -> &SqlRequest {
        &self.request
    }

    /// Mutable access to the underlying request (groups, users, query, note).
    pub fn request_mut(&mut self) -> &mut SqlRequest {
        &mut self.request
    }

    pub fn state(&self) -> RequestState {
        self.request.state()
    }

    pub fn technical_name(&self) -> &str {
        &self.technical_name
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_materialized(&self) -> bool {
        self.is_materialized
    }

    /// On-disk size, measured when the view is created or refreshed.
    pub fn size(&self) -> Option<&str> {
        self.size.as_deref()
    }

    pub fn view_order(&self) -> &ViewOrder {
        &self.view_order
    }

    pub fn action_context(&self) -> &ContextOverlay {
        &self.action_context
    }

    pub fn fields(&self) -> &[ViewField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ViewField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    pub fn artifacts(&self) -> &ViewArtifacts {
        &self.artifacts
    }

    fn ensure_editable(&self, what: &str) -> RequestResult<()> {
        if !self.state().is_editable() {
            return Err(RequestError::state(format!(
                "{what} can only be changed in draft or sql_valid state"
            )));
        }
        Ok(())
    }

    /// Rename the view; `view_name` and `model_name` follow.
    pub fn set_technical_name(&mut self, technical_name: impl Into<String>) -> RequestResult<()> {
        self.ensure_editable("The technical name")?;
        let technical_name = technical_name.into();
        validate_technical_name(&technical_name, VIEW_PREFIX)?;
        self.view_name = format!("{VIEW_PREFIX}{technical_name}");
        self.model_name = format!("{MODEL_PREFIX}{technical_name}");
        self.technical_name = technical_name;
        Ok(())
    }

    /// Indexes exist only on materialized views.
    pub fn set_materialized(&mut self, materialized: bool) -> RequestResult<()> {
        self.ensure_editable("Materialization")?;
        if !materialized && self.fields.iter().any(|f| f.is_index) {
            return Err(RequestError::validation(
                "You can not create indexes on non materialized views",
            ));
        }
        self.is_materialized = materialized;
        Ok(())
    }

    pub fn set_view_order(&mut self, view_order: &str) -> RequestResult<()> {
        self.view_order = view_order.parse()?;
        Ok(())
    }

    /// Replace the user context overlay, given as a JSON object.
    pub fn set_action_context(&mut self, raw: &str) -> RequestResult<()> {
        self.action_context = ContextOverlay::parse(raw)?;
        Ok(())
    }

    /// Change the ordering key, propagating it to the menu when there is one.
    pub async fn set_sequence(&mut self, sequence: i32, collab: Collaborators<'_>) -> RequestResult<()> {
        if let Some(menu) = self.artifacts.menu {
            collab.ui.set_menu_sequence(menu, sequence).await?;
        }
        self.sequence = sequence;
        Ok(())
    }

    /// Edit one field. The edit is discarded if it breaks an invariant.
    pub fn edit_field(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut ViewField),
    ) -> RequestResult<()> {
        self.ensure_editable("Fields")?;
        let index = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| RequestError::validation(format!("Unknown field '{name}'")))?;

        let mut edited = self.fields[index].clone();
        edit(&mut edited);
        if edited.name != name || edited.sequence != self.fields[index].sequence {
            return Err(RequestError::validation(
                "Field name and sequence come from the query and cannot be edited",
            ));
        }
        if edited.is_index && !self.is_materialized {
            return Err(RequestError::validation(
                "You can not create indexes on non materialized views",
            ));
        }
        edited.check()?;
        self.fields[index] = edited;
        Ok(())
    }

    /// Deletion is only allowed while no artifact exists.
    pub fn check_unlink(&self) -> RequestResult<()> {
        if !self.state().is_editable() {
            return Err(RequestError::state(
                "You can only unlink draft views. If you want to delete them, first set them to draft.",
            ));
        }
        Ok(())
    }

    /// Draft copy with a derived name and technical name, without fields or artifacts.
    pub fn duplicate(&self, id: i64, config: &SqlRequestConfig) -> RequestResult<Self> {
        let mut copy = Self::new(
            id,
            format!("{} (Copy)", self.name()),
            format!("{}_copy", self.technical_name),
            self.request.query(),
            config,
        )?;
        copy.request.note = self.request.note.clone();
        copy.request.set_group_ids(self.request.group_ids().iter().cloned());
        copy.request.set_user_ids(self.request.user_ids().iter().copied());
        copy.is_materialized = self.is_materialized;
        copy.view_order = self.view_order.clone();
        copy.domain_force = self.domain_force.clone();
        copy.action_context = self.action_context.clone();
        copy.parent_menu = self.parent_menu.clone();
        copy.sequence = self.sequence;
        Ok(copy)
    }
}

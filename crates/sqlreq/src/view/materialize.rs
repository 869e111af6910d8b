//! State transitions of [`SqlView`].
//!
//! Forward transitions either complete or leave nothing behind: collaborator
//! records created so far are removed again and the DDL runs inside a checkpoint
//! that is rolled back on failure. Backward transitions remove what the
//! matching forward transition created.

use super::ddl;
use super::sync::{SyncReport, synchronize_fields};
use super::ui::{ViewKind, action_name, build_arch, computed_action_context};
use super::{ENTITY, SqlView, ViewArtifacts};
use crate::checkpoint::{Checkpoint, settle};
use crate::collab::{
    AccessSpec, ActionSpec, ArtifactId, Collaborators, CronSpec, MenuSpec, ModelFieldSpec,
    ModelSpec, RuleSpec, UiViewSpec,
};
use crate::context::ExecContext;
use crate::error::{RequestError, RequestResult};
use crate::executor::{ExecMode, ExecOptions, PREVIEW_ROWS, format_row};
use crate::external::ExternalConnector;
use crate::probe::ViewProbe;
use crate::request::RequestState;
use crate::session::SqlSession;
use chrono::{DateTime, Duration, Utc};

/// A collaborator record to remove if a transition fails halfway.
#[derive(Debug, Clone)]
enum Undo {
    Model(ArtifactId),
    Rule(ArtifactId),
    Access(String),
    Task(ArtifactId),
    View(ArtifactId),
    Action(ArtifactId),
    Menu(ArtifactId),
}

/// Remove `steps` in reverse order. Failures are logged and skipped.
async fn unwind(entity: &str, steps: Vec<Undo>, collab: Collaborators<'_>) {
    for step in steps.into_iter().rev() {
        let result = match &step {
            Undo::Model(id) => collab.schema.drop_model(*id).await,
            Undo::Rule(id) => collab.schema.drop_rule(*id).await,
            Undo::Access(model) => collab.schema.drop_access(model).await,
            Undo::Task(id) => collab.scheduler.set_task_active(*id, false).await,
            Undo::View(id) => collab.ui.delete_view(*id).await,
            Undo::Action(id) => collab.ui.delete_action(*id).await,
            Undo::Menu(id) => collab.ui.delete_menu(*id).await,
        };
        if let Err(e) = result {
            tracing::warn!(target: "sqlreq.sql", entity, step = ?step, error = %e, "compensation failed");
        }
    }
}

impl SqlView {
    /// Validate the query and synchronize the fields with its columns.
    ///
    /// The query is probed as a throwaway plain view inside a rolled-back
    /// checkpoint. Nothing changes unless the probe succeeds and at least one
    /// field remains.
    pub async fn validate<S, C>(&mut self, ctx: &ExecContext<'_, S, C>) -> RequestResult<SyncReport>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        if self.request.use_external_database() {
            return Err(RequestError::config(
                "SQL views are always created on the local database",
            ));
        }
        let mut request = self.request.clone();
        let mut probe = ViewProbe::new(self.view_name.clone());
        let columns = request.validate(ctx, &mut probe).await?.unwrap_or_default();

        let mut fields = self.fields.clone();
        let report = synchronize_fields(&mut fields, &columns)?;
        if !self.is_materialized {
            for field in fields.iter_mut() {
                field.is_index = false;
            }
        }

        self.request = request;
        self.fields = fields;
        Ok(report)
    }

    /// Validate, then show the first rows of the query as text lines.
    pub async fn preview<S, C>(&mut self, ctx: &ExecContext<'_, S, C>) -> RequestResult<Vec<String>>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        self.validate(ctx).await?;
        let rows = self
            .request
            .execute(ctx, ExecMode::Fetchall, ExecOptions::default())
            .await?
            .into_rows()
            .unwrap_or_default();
        Ok(rows.iter().take(PREVIEW_ROWS).map(|r| format_row(r)).collect())
    }

    fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            name: self.request.name.clone(),
            model: self.model_name.clone(),
            fields: self
                .fields
                .iter()
                .filter(|f| f.is_user_facing())
                .map(|f| ModelFieldSpec {
                    name: f.name.clone(),
                    description: f.field_description.clone(),
                    ttype: f.ttype,
                    relation: f.many2one_model.clone(),
                    group_operator: f.group_operator,
                })
                .collect(),
        }
    }

    fn access_specs(&self) -> Vec<AccessSpec> {
        self.request
            .group_ids()
            .iter()
            .map(|group| AccessSpec {
                name: format!("{} Access {group}", self.model_name),
                model: self.model_name.clone(),
                group: group.clone(),
            })
            .collect()
    }

    fn rule_spec(&self) -> RuleSpec {
        RuleSpec {
            name: format!("Access {}", self.request.name),
            model: self.model_name.clone(),
            domain_force: self.domain_force.clone(),
        }
    }

    fn cron_spec(&self, interval_days: u32, now: DateTime<Utc>) -> CronSpec {
        CronSpec {
            name: format!("Refresh Materialized View {}", self.view_name),
            interval_days,
            next_call: now + Duration::days(i64::from(interval_days)),
            entity: ENTITY.to_string(),
            target_ids: vec![self.id],
        }
    }

    async fn create_model_access(&self, collab: Collaborators<'_>) -> RequestResult<()> {
        for spec in self.access_specs() {
            collab.schema.create_access(&spec).await?;
        }
        Ok(())
    }

    /// `sql_valid -> model_valid`: create the model, its access and rule, the
    /// database view with its indexes, and the refresh task of materialized views.
    pub async fn create_sql_view_and_model<S, C>(
        &mut self,
        ctx: &ExecContext<'_, S, C>,
        collab: Collaborators<'_>,
    ) -> RequestResult<()>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        if self.state() != RequestState::SqlValid {
            return Err(RequestError::state(format!(
                "The view and model can only be created from sql_valid, not {}",
                self.state()
            )));
        }
        let unbound: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.ttype == super::FieldType::Many2one && f.many2one_model.is_none())
            .map(|f| f.name.as_str())
            .collect();
        if !unbound.is_empty() {
            return Err(RequestError::validation(format!(
                "Please set related models on the following fields {}",
                unbound.join(",")
            )));
        }

        let mut undo = Vec::new();
        match self.build_model(ctx, collab, &mut undo).await {
            Ok(artifacts) => {
                self.artifacts = artifacts;
                self.request.set_state(RequestState::ModelValid);
                Ok(())
            }
            Err(e) => {
                unwind(ENTITY, undo, collab).await;
                Err(e)
            }
        }
    }

    async fn build_model<S, C>(
        &mut self,
        ctx: &ExecContext<'_, S, C>,
        collab: Collaborators<'_>,
        undo: &mut Vec<Undo>,
    ) -> RequestResult<ViewArtifacts>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        let mut artifacts = self.artifacts.clone();

        let model = collab.schema.create_model(&self.model_spec()).await?;
        undo.push(Undo::Model(model));
        artifacts.model = Some(model);

        let rule = collab.schema.create_rule(&self.rule_spec()).await?;
        undo.push(Undo::Rule(rule));
        artifacts.rule = Some(rule);

        undo.push(Undo::Access(self.model_name.clone()));
        self.create_model_access(collab).await?;

        let session = ctx.session();
        let checkpoint = Checkpoint::create(session, ENTITY).await?;
        let built = async {
            ddl::drop_table_if_exists(session, &self.view_name).await?;
            ddl::create_view(session, &self.view_name, self.request.query(), self.is_materialized)
                .await?;
            ddl::create_indexes(session, &self.view_name, &self.fields).await?;
            let size = ddl::relation_size(session, &self.view_name).await?;

            if self.is_materialized {
                match artifacts.cron {
                    Some(cron) => collab.scheduler.set_task_active(cron, true).await?,
                    None => {
                        let spec = self.cron_spec(ctx.config().refresh.interval_days, Utc::now());
                        artifacts.cron = Some(collab.scheduler.create_task(&spec).await?);
                    }
                }
                if let Some(cron) = artifacts.cron {
                    undo.push(Undo::Task(cron));
                }
            }
            Ok::<_, RequestError>(size)
        }
        .await;

        // keep the task id even on failure so a later attempt reactivates it
        self.artifacts.cron = artifacts.cron;
        match built {
            Ok(size) => {
                checkpoint.release(session).await?;
                self.size = size;
                Ok(artifacts)
            }
            Err(e) => settle(Err(e), checkpoint.rollback(session).await),
        }
    }

    /// `ui_valid -> model_valid`: delete the presentation views, action and menu.
    ///
    /// Does nothing in any other state.
    pub async fn reset_to_model_valid(&mut self, collab: Collaborators<'_>) -> RequestResult<()> {
        if self.state() != RequestState::UiValid {
            return Ok(());
        }
        for kind in [ViewKind::List, ViewKind::Graph, ViewKind::Pivot, ViewKind::Search] {
            if let Some(id) = self.artifacts.view_for(kind) {
                collab.ui.delete_view(id).await?;
                self.artifacts.set_view(kind, None);
            }
        }
        if let Some(id) = self.artifacts.action {
            collab.ui.delete_action(id).await?;
            self.artifacts.action = None;
        }
        if let Some(id) = self.artifacts.menu {
            collab.ui.delete_menu(id).await?;
            self.artifacts.menu = None;
        }
        self.request.set_state(RequestState::ModelValid);
        Ok(())
    }

    /// `model_valid -> sql_valid`, going through `model_valid` first when the UI
    /// exists. Drops the view, deactivates the refresh task and removes the model,
    /// its access and its rule.
    pub async fn reset_to_sql_valid<S, C>(
        &mut self,
        ctx: &ExecContext<'_, S, C>,
        collab: Collaborators<'_>,
    ) -> RequestResult<()>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        self.reset_to_model_valid(collab).await?;
        if self.state() != RequestState::ModelValid {
            return Ok(());
        }

        ddl::drop_view(ctx.session(), &self.view_name, self.is_materialized).await?;
        self.size = None;
        if let Some(cron) = self.artifacts.cron {
            collab.scheduler.set_task_active(cron, false).await?;
        }
        collab.schema.drop_access(&self.model_name).await?;
        if let Some(rule) = self.artifacts.rule.take() {
            collab.schema.drop_rule(rule).await?;
        }
        if let Some(model) = self.artifacts.model.take() {
            collab.schema.drop_model(model).await?;
        }
        self.request.set_state(RequestState::SqlValid);
        Ok(())
    }

    /// Reset all the way back to draft.
    pub async fn set_draft<S, C>(
        &mut self,
        ctx: &ExecContext<'_, S, C>,
        collab: Collaborators<'_>,
    ) -> RequestResult<()>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        self.reset_to_sql_valid(ctx, collab).await?;
        self.request.set_draft()
    }

    /// `model_valid -> ui_valid`: create the four views, the action and the menu.
    pub async fn create_ui(&mut self, collab: Collaborators<'_>, now: DateTime<Utc>) -> RequestResult<()> {
        if self.state() != RequestState::ModelValid {
            return Err(RequestError::state(format!(
                "The UI can only be created from model_valid, not {}",
                self.state()
            )));
        }
        let mut undo = Vec::new();
        match self.build_ui(collab, now, &mut undo).await {
            Ok(artifacts) => {
                self.artifacts = artifacts;
                self.request.set_state(RequestState::UiValid);
                Ok(())
            }
            Err(e) => {
                unwind(ENTITY, undo, collab).await;
                Err(e)
            }
        }
    }

    async fn build_ui(
        &self,
        collab: Collaborators<'_>,
        now: DateTime<Utc>,
        undo: &mut Vec<Undo>,
    ) -> RequestResult<ViewArtifacts> {
        let mut artifacts = self.artifacts.clone();
        for kind in [ViewKind::List, ViewKind::Graph, ViewKind::Pivot, ViewKind::Search] {
            let spec = UiViewSpec {
                name: self.request.name.clone(),
                kind,
                model: self.model_name.clone(),
                arch: build_arch(kind, &self.fields),
            };
            let id = collab.ui.create_view(&spec).await?;
            undo.push(Undo::View(id));
            artifacts.set_view(kind, Some(id));
        }

        let missing = || RequestError::state("presentation view was not created");
        let default_view = artifacts.view_for(self.view_order.first()).ok_or_else(missing)?;
        let search_view = artifacts.search_view.ok_or_else(missing)?;
        let context = self.action_context.apply(computed_action_context(&self.fields));
        let action = collab
            .ui
            .create_action(&ActionSpec {
                name: action_name(&self.request.name, self.is_materialized, now),
                model: self.model_name.clone(),
                view_mode: self.view_order.to_string(),
                view_id: default_view,
                search_view_id: search_view,
                context: serde_json::Value::Object(context),
            })
            .await?;
        undo.push(Undo::Action(action));
        artifacts.action = Some(action);

        let menu = collab
            .ui
            .create_menu(&MenuSpec {
                name: self.request.name.clone(),
                parent: self.parent_menu.clone(),
                action,
                sequence: self.sequence,
            })
            .await?;
        undo.push(Undo::Menu(menu));
        artifacts.menu = Some(menu);
        Ok(artifacts)
    }

    /// Recreate the per-group read access after the groups changed.
    pub async fn update_model_access(&mut self, collab: Collaborators<'_>) -> RequestResult<()> {
        if self.artifacts.model.is_none() {
            return Err(RequestError::state(
                "Access can only be updated once the model exists",
            ));
        }
        collab.schema.drop_access(&self.model_name).await?;
        self.create_model_access(collab).await?;
        self.request.clear_group_changed();
        Ok(())
    }

    /// Refresh a materialized view, re-measure it and stamp the action name.
    ///
    /// Plain views are left alone.
    pub async fn refresh_materialized_view<S: SqlSession>(
        &mut self,
        session: &S,
        collab: Collaborators<'_>,
        now: DateTime<Utc>,
    ) -> RequestResult<()> {
        if !self.is_materialized {
            return Ok(());
        }
        if !matches!(self.state(), RequestState::ModelValid | RequestState::UiValid) {
            return Err(RequestError::state(format!(
                "View {} does not exist yet (state {})",
                self.view_name,
                self.state()
            )));
        }
        ddl::refresh_view(session, &self.view_name).await?;
        self.size = ddl::relation_size(session, &self.view_name).await?;
        if let Some(action) = self.artifacts.action {
            collab
                .ui
                .rename_action(action, &action_name(&self.request.name, true, now))
                .await?;
        }
        Ok(())
    }
}

/// Entry point of the refresh task: refresh every materialized view of `views`
/// listed in `ids` that has been created. Returns how many were refreshed.
pub async fn refresh_materialized_views<S: SqlSession>(
    views: &mut [SqlView],
    ids: &[i64],
    session: &S,
    collab: Collaborators<'_>,
    now: DateTime<Utc>,
) -> RequestResult<usize> {
    let mut refreshed = 0;
    for view in views.iter_mut().filter(|v| {
        v.is_materialized
            && matches!(v.state(), RequestState::ModelValid | RequestState::UiValid)
            && ids.contains(&v.id)
    }) {
        view.refresh_materialized_view(session, collab, now).await?;
        refreshed += 1;
    }
    Ok(refreshed)
}

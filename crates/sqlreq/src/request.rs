//! The SQL request entity and its validation state machine.
//!
//! A request starts in [`RequestState::Draft`]. Validating it runs, in order and
//! each only if enabled for the entity type:
//!
//! 1. terminator stripping ([`clean_query`])
//! 2. the prohibited-word check ([`check_prohibited_words`])
//! 3. an execution probe inside a rolled-back checkpoint
//!
//! and then moves it to [`RequestState::SqlValid`]. Nothing on the entity changes
//! unless all steps succeed.

use crate::checkpoint::{Checkpoint, settle};
use crate::config::SqlRequestConfig;
use crate::context::ExecContext;
use crate::error::{RequestError, RequestResult};
use crate::external::ExternalConnector;
use crate::sanitize::{check_prohibited_words, clean_query};
use crate::session::SqlSession;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of a request.
///
/// Plain requests only use `Draft` and `SqlValid`; views extend the lifecycle with
/// `ModelValid` and `UiValid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    SqlValid,
    ModelValid,
    UiValid,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::SqlValid => "sql_valid",
            Self::ModelValid => "model_valid",
            Self::UiValid => "ui_valid",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::SqlValid => "SQL Valid",
            Self::ModelValid => "SQL View and Model Created",
            Self::UiValid => "Views, Action and Menu Created",
        }
    }

    /// States in which the entity has no durable artifacts.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::SqlValid)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation steps enabled for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub clean_query: bool,
    pub check_prohibited_words: bool,
    pub check_execution: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        clean_query: true,
        check_prohibited_words: true,
        check_execution: true,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::ALL
    }
}

/// Customizes the execution probe run during validation.
///
/// The hook can rewrite the statement that is executed and inspect the session
/// before the checkpoint is rolled back.
pub trait ExecutionHook: Send + Sync {
    type Output: Send;

    /// Statement executed to prove that `query` is valid.
    fn prepare_check_query(&self, query: &str) -> String {
        query.to_string()
    }

    /// Called after the statement ran, before the rollback.
    fn after_execute<S: SqlSession>(
        &mut self,
        session: &S,
    ) -> impl Future<Output = RequestResult<Self::Output>> + Send;
}

/// Probe that only checks the query executes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCheck;

impl ExecutionHook for PlainCheck {
    type Output = ();

    async fn after_execute<S: SqlSession>(&mut self, _session: &S) -> RequestResult<()> {
        Ok(())
    }
}

/// A free-text SQL request.
#[derive(Debug, Clone)]
pub struct SqlRequest {
    entity: String,
    pub name: String,
    pub note: Option<String>,
    query: String,
    state: RequestState,
    group_ids: BTreeSet<String>,
    user_ids: BTreeSet<i64>,
    use_external_database: bool,
    has_group_changed: bool,
    capabilities: Capabilities,
}

impl SqlRequest {
    /// Create a draft request for entity type `entity` (e.g. `sql.export`).
    ///
    /// Access defaults to `config.views.default_groups`.
    pub fn new(
        entity: impl Into<String>,
        name: impl Into<String>,
        query: impl Into<String>,
        config: &SqlRequestConfig,
    ) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
            note: None,
            query: query.into(),
            state: RequestState::Draft,
            group_ids: config.views.default_groups.iter().cloned().collect(),
            user_ids: BTreeSet::new(),
            use_external_database: false,
            has_group_changed: false,
            capabilities: Capabilities::ALL,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn group_ids(&self) -> &BTreeSet<String> {
        &self.group_ids
    }

    pub fn user_ids(&self) -> &BTreeSet<i64> {
        &self.user_ids
    }

    pub fn use_external_database(&self) -> bool {
        self.use_external_database
    }

    pub fn has_group_changed(&self) -> bool {
        self.has_group_changed
    }

    /// Replace the request body. Only drafts can be edited.
    pub fn set_query(&mut self, query: impl Into<String>) -> RequestResult<()> {
        if self.state != RequestState::Draft {
            return Err(RequestError::state(
                "The query can only be changed on draft requests",
            ));
        }
        self.query = query.into();
        Ok(())
    }

    /// Replace the allowed groups.
    ///
    /// Once durable artifacts exist, the change is flagged so access can be resynced.
    pub fn set_group_ids<I, G>(&mut self, groups: I)
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        if !self.state.is_editable() {
            self.has_group_changed = true;
        }
    }

    pub fn set_user_ids(&mut self, users: impl IntoIterator<Item = i64>) {
        self.user_ids = users.into_iter().collect();
    }

    /// Switch between the ambient and the external database.
    pub fn set_use_external_database(
        &mut self,
        enabled: bool,
        config: &SqlRequestConfig,
    ) -> RequestResult<()> {
        if enabled {
            config.external_database_url()?;
        }
        self.use_external_database = enabled;
        Ok(())
    }

    /// Fail when the request targets an external database that is not configured.
    pub fn check_external_config(&self, config: &SqlRequestConfig) -> RequestResult<()> {
        if self.use_external_database {
            config.external_database_url()?;
        }
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    pub(crate) fn clear_group_changed(&mut self) {
        self.has_group_changed = false;
    }

    /// Run the validation pipeline and move to `sql_valid`.
    ///
    /// Returns the hook output when the execution probe is enabled.
    pub async fn validate<S, C, H>(
        &mut self,
        ctx: &ExecContext<'_, S, C>,
        hook: &mut H,
    ) -> RequestResult<Option<H::Output>>
    where
        S: SqlSession,
        C: ExternalConnector,
        H: ExecutionHook,
    {
        if !self.state.is_editable() {
            return Err(RequestError::state(format!(
                "Cannot validate a request in state '{}', reset it first",
                self.state
            )));
        }
        self.check_external_config(ctx.config())?;

        let query = if self.capabilities.clean_query {
            clean_query(&self.query)?
        } else {
            self.query.clone()
        };
        if self.capabilities.check_prohibited_words {
            check_prohibited_words(&query)?;
        }
        let output = if self.capabilities.check_execution {
            Some(self.check_execution(ctx, &query, hook).await?)
        } else {
            None
        };

        self.query = query;
        self.state = RequestState::SqlValid;
        Ok(output)
    }

    /// Go back to draft, clearing the group-changed flag.
    ///
    /// Entities with durable artifacts must unwind them before calling this.
    pub fn set_draft(&mut self) -> RequestResult<()> {
        if !self.state.is_editable() {
            return Err(RequestError::state(format!(
                "Cannot reset a request in state '{}' to draft before its artifacts are removed",
                self.state
            )));
        }
        self.has_group_changed = false;
        self.state = RequestState::Draft;
        Ok(())
    }

    async fn check_execution<S, C, H>(
        &self,
        ctx: &ExecContext<'_, S, C>,
        query: &str,
        hook: &mut H,
    ) -> RequestResult<H::Output>
    where
        S: SqlSession,
        C: ExternalConnector,
        H: ExecutionHook,
    {
        let sql = hook.prepare_check_query(query);
        let target = ctx.open(self.use_external_database).await?;
        let checkpoint = match Checkpoint::create(&target, &self.entity).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => return settle(Err(e), ctx.close(target, false).await),
        };

        let result = async {
            target.batch_execute(&sql).await.map_err(|e| match e {
                RequestError::Database(message) => {
                    tracing::error!(target: "sqlreq.sql", query = %sql, error = %message, "Failed query");
                    RequestError::InvalidQuery {
                        query: sql.clone(),
                        message,
                    }
                }
                other => other,
            })?;
            hook.after_execute(&target).await
        }
        .await;

        let rollback = checkpoint.rollback(&target).await;
        let closed = ctx.close(target, false).await;
        settle(settle(result, rollback), closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedConnector, ScriptedSession};

    fn request(query: &str) -> SqlRequest {
        SqlRequest::new("sql.export", "Test", query, &SqlRequestConfig::default())
    }

    fn external_config() -> SqlRequestConfig {
        SqlRequestConfig::from_toml_str(
            r#"
external_db_name = "warehouse"

[external_databases.warehouse]
url = "postgres://localhost/warehouse"
"#,
        )
        .unwrap()
    }

    #[test]
    fn new_request_is_draft_with_default_group() {
        let req = request("SELECT 1");
        assert_eq!(req.state(), RequestState::Draft);
        assert!(req.group_ids().contains(crate::config::DEFAULT_GROUP));
        assert!(!req.has_group_changed());
    }

    #[tokio::test]
    async fn validate_cleans_and_moves_to_sql_valid() {
        let session = ScriptedSession::new();
        let config = SqlRequestConfig::default();
        let ctx = ExecContext::new(&session, &config);
        let mut req = request("SELECT 1 AS x_a;;  ");

        req.validate(&ctx, &mut PlainCheck).await.unwrap();

        assert_eq!(req.query(), "SELECT 1 AS x_a");
        assert_eq!(req.state(), RequestState::SqlValid);
        let stmts = session.statements();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].starts_with("SAVEPOINT sql_export_"));
        assert_eq!(stmts[1], "SELECT 1 AS x_a");
        assert!(stmts[2].starts_with("ROLLBACK TO SAVEPOINT sql_export_"));
    }

    #[tokio::test]
    async fn prohibited_word_fails_before_execution() {
        let session = ScriptedSession::new();
        let config = SqlRequestConfig::default();
        let ctx = ExecContext::new(&session, &config);
        let mut req = request("DROP TABLE foo;");

        let err = req.validate(&ctx, &mut PlainCheck).await.unwrap_err();

        assert!(matches!(err, RequestError::ProhibitedWord(ref w) if w == "drop"));
        assert!(session.statements().is_empty());
        assert_eq!(req.state(), RequestState::Draft);
        assert_eq!(req.query(), "DROP TABLE foo;");
    }

    #[tokio::test]
    async fn invalid_sql_is_wrapped_and_rolled_back() {
        let session = ScriptedSession::new().fail_on("SELEC ", "syntax error at or near \"SELEC\"");
        let config = SqlRequestConfig::default();
        let ctx = ExecContext::new(&session, &config);
        let mut req = request("SELEC 1");

        let err = req.validate(&ctx, &mut PlainCheck).await.unwrap_err();

        match err {
            RequestError::InvalidQuery { query, message } => {
                assert_eq!(query, "SELEC 1");
                assert!(message.contains("syntax error"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(session.count("ROLLBACK TO SAVEPOINT"), 1);
        assert_eq!(req.state(), RequestState::Draft);
    }

    #[tokio::test]
    async fn disabled_steps_are_skipped() {
        let session = ScriptedSession::new();
        let config = SqlRequestConfig::default();
        let ctx = ExecContext::new(&session, &config);
        let mut req = request("SELECT 1 AS x_delete;").with_capabilities(Capabilities {
            clean_query: false,
            check_prohibited_words: false,
            check_execution: false,
        });

        let out = req.validate(&ctx, &mut PlainCheck).await.unwrap();

        assert!(out.is_none());
        assert_eq!(req.query(), "SELECT 1 AS x_delete;");
        assert_eq!(req.state(), RequestState::SqlValid);
        assert!(session.statements().is_empty());
    }

    #[tokio::test]
    async fn external_request_runs_on_its_own_connection() {
        let local = ScriptedSession::new();
        let connector = ScriptedConnector::new(ScriptedSession::new());
        let config = external_config();
        let ctx = ExecContext::new(&local, &config).with_connector(&connector);
        let mut req = request("SELECT 1");
        req.set_use_external_database(true, &config).unwrap();

        req.validate(&ctx, &mut PlainCheck).await.unwrap();

        assert!(local.statements().is_empty());
        assert_eq!(connector.session.count("SAVEPOINT"), 2);
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[test]
    fn external_flag_requires_configuration() {
        let mut req = request("SELECT 1");
        let err = req
            .set_use_external_database(true, &SqlRequestConfig::default())
            .unwrap_err();
        assert!(matches!(err, RequestError::Config(_)));
        assert!(!req.use_external_database());
    }

    #[test]
    fn group_change_is_flagged_only_after_sql_valid() {
        let mut req = request("SELECT 1");
        req.set_group_ids(["base.group_user"]);
        assert!(!req.has_group_changed());

        req.set_state(RequestState::ModelValid);
        req.set_group_ids(["base.group_user", "base.group_system"]);
        assert!(req.has_group_changed());
    }

    #[test]
    fn set_draft_clears_flag() {
        let mut req = request("SELECT 1");
        req.set_state(RequestState::SqlValid);
        req.has_group_changed = true;
        req.set_draft().unwrap();
        assert_eq!(req.state(), RequestState::Draft);
        assert!(!req.has_group_changed());
    }

    #[test]
    fn set_draft_refuses_to_skip_states() {
        let mut req = request("SELECT 1");
        req.set_state(RequestState::ModelValid);
        assert!(req.set_draft().unwrap_err().is_precondition());
        assert_eq!(req.state(), RequestState::ModelValid);
    }

    #[test]
    fn query_is_frozen_outside_draft() {
        let mut req = request("SELECT 1");
        req.set_state(RequestState::SqlValid);
        assert!(req.set_query("SELECT 2").is_err());
        assert_eq!(req.query(), "SELECT 1");
    }
}

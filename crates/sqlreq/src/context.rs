//! Execution context handed to request operations.

use crate::config::SqlRequestConfig;
use crate::error::RequestResult;
use crate::external::{ExternalConnector, NoExternal, QueryTarget};
use crate::session::SqlSession;

/// Everything a request needs to reach the database.
///
/// `session` is the ambient connection (usually the caller's open transaction);
/// `connector` opens external databases for requests that ask for one.
pub struct ExecContext<'a, S, C = NoExternal> {
    session: &'a S,
    connector: &'a C,
    config: &'a SqlRequestConfig,
}

impl<'a, S: SqlSession> ExecContext<'a, S, NoExternal> {
    /// Context without external database support.
    pub fn new(session: &'a S, config: &'a SqlRequestConfig) -> Self {
        Self {
            session,
            connector: &NoExternal,
            config,
        }
    }
}

impl<'a, S: SqlSession, C: ExternalConnector> ExecContext<'a, S, C> {
    /// Use `connector` to open external databases.
    pub fn with_connector<C2: ExternalConnector>(self, connector: &'a C2) -> ExecContext<'a, S, C2> {
        ExecContext {
            session: self.session,
            connector,
            config: self.config,
        }
    }

    /// The ambient session.
    pub fn session(&self) -> &'a S {
        self.session
    }

    pub fn config(&self) -> &'a SqlRequestConfig {
        self.config
    }

    /// Resolve the session a request runs on.
    pub async fn open(&self, use_external: bool) -> RequestResult<QueryTarget<'a, S, C::Session>> {
        if !use_external {
            return Ok(QueryTarget::Local(self.session));
        }
        let (name, url) = self.config.external_database_url()?;
        tracing::debug!(target: "sqlreq.external", database = name, "opening external connection");
        Ok(QueryTarget::External(self.connector.connect(url).await?))
    }

    /// Release a target obtained from [`ExecContext::open`].
    ///
    /// External sessions are closed; `commit` keeps their work. The ambient session
    /// is left to its owner.
    pub async fn close(
        &self,
        target: QueryTarget<'a, S, C::Session>,
        commit: bool,
    ) -> RequestResult<()> {
        match target {
            QueryTarget::Local(_) => Ok(()),
            QueryTarget::External(session) => self.connector.close(session, commit).await,
        }
    }
}

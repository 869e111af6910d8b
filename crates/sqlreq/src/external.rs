//! Connection targets: the ambient session or a freshly opened external database.
//!
//! External connections are never pooled. Each request execution opens one,
//! starts a transaction on it so checkpoints work, and closes it right after
//! the checkpoint has been rolled back.

use crate::error::{RequestError, RequestResult};
use crate::session::{QueryRows, SqlSession};
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;

/// Resolves a configured external database into a live session.
pub trait ExternalConnector: Send + Sync {
    type Session: SqlSession;

    /// Open a new session on the database at `url`, inside a transaction.
    fn connect(&self, url: &str) -> impl Future<Output = RequestResult<Self::Session>> + Send;

    /// Close a session obtained from [`ExternalConnector::connect`], committing its
    /// transaction first when `commit` is set.
    fn close(
        &self,
        session: Self::Session,
        commit: bool,
    ) -> impl Future<Output = RequestResult<()>> + Send;
}

/// Connector that opens plain (non-TLS) tokio-postgres connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

/// A dedicated connection to an external database.
pub struct ExternalSession {
    client: tokio_postgres::Client,
    connection: JoinHandle<()>,
}

impl ExternalConnector for PgConnector {
    type Session = ExternalSession;

    async fn connect(&self, url: &str) -> RequestResult<ExternalSession> {
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| RequestError::Connection(e.to_string()))?;
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| RequestError::Connection(e.to_string()))?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target: "sqlreq.external", error = %e, "external connection error");
            }
        });
        client
            .batch_execute("BEGIN")
            .await
            .map_err(RequestError::from_db_error)?;
        Ok(ExternalSession { client, connection })
    }

    async fn close(&self, session: ExternalSession, commit: bool) -> RequestResult<()> {
        let ExternalSession { client, connection } = session;
        let end = if commit { "COMMIT" } else { "ROLLBACK" };
        let ended = client
            .batch_execute(end)
            .await
            .map_err(RequestError::from_db_error);
        drop(client);
        join_connection(connection).await;
        ended
    }
}

/// Wait for the connection task to end. Returns `false` if it panicked or was cancelled.
async fn join_connection(connection: JoinHandle<()>) -> bool {
    match connection.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "sqlreq.external", error = %e, "external connection task failed");
            false
        }
    }
}

impl SqlSession for ExternalSession {
    async fn batch_execute(&self, sql: &str) -> RequestResult<()> {
        SqlSession::batch_execute(&self.client, sql).await
    }

    async fn simple_query(&self, sql: &str) -> RequestResult<QueryRows> {
        SqlSession::simple_query(&self.client, sql).await
    }

    async fn copy_out(&self, sql: &str) -> RequestResult<Vec<u8>> {
        SqlSession::copy_out(&self.client, sql).await
    }
}

/// Connector used when no external database is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternal;

impl ExternalConnector for NoExternal {
    type Session = tokio_postgres::Client;

    async fn connect(&self, _url: &str) -> RequestResult<tokio_postgres::Client> {
        Err(RequestError::config(
            "no external connector was provided for this execution",
        ))
    }

    async fn close(&self, _session: tokio_postgres::Client, _commit: bool) -> RequestResult<()> {
        Ok(())
    }
}

/// The session a request actually runs on.
pub enum QueryTarget<'a, S, E> {
    Local(&'a S),
    External(E),
}

impl<S, E> QueryTarget<'_, S, E> {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

impl<S: SqlSession, E: SqlSession> SqlSession for QueryTarget<'_, S, E> {
    async fn batch_execute(&self, sql: &str) -> RequestResult<()> {
        match self {
            Self::Local(s) => s.batch_execute(sql).await,
            Self::External(s) => s.batch_execute(sql).await,
        }
    }

    async fn simple_query(&self, sql: &str) -> RequestResult<QueryRows> {
        match self {
            Self::Local(s) => s.simple_query(sql).await,
            Self::External(s) => s.simple_query(sql).await,
        }
    }

    async fn copy_out(&self, sql: &str) -> RequestResult<Vec<u8>> {
        match self {
            Self::Local(s) => s.copy_out(sql).await,
            Self::External(s) => s.copy_out(sql).await,
        }
    }
}

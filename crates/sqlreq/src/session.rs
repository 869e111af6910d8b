//! Session trait for running free-text SQL against PostgreSQL.

use crate::error::{RequestError, RequestResult};
use futures_util::{TryStreamExt, pin_mut};
use tokio_postgres::SimpleQueryMessage;

/// Rows returned by a text-protocol query.
///
/// Values are kept in their text representation, so queries with arbitrary
/// column types can be read back without knowing them in advance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryRows {
    /// Create a result set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set from simple query messages.
    ///
    /// When several statements were sent, the last result set wins.
    pub fn from_messages(messages: Vec<SimpleQueryMessage>) -> Self {
        let mut out = Self::default();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    out.columns = columns.iter().map(|c| c.name().to_string()).collect();
                    out.rows.clear();
                }
                SimpleQueryMessage::Row(row) => {
                    if out.columns.is_empty() {
                        out.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    out.rows
                        .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                _ => {}
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Vec<Option<String>>> {
        self.rows.first()
    }

    /// Text value at `row`/`column`, `None` for SQL NULL or out of range.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }
}

/// A connection (or transaction) that SQL requests can run on.
///
/// Implemented for `tokio_postgres::Client` and `tokio_postgres::Transaction`, so the
/// ambient transaction of the embedding application can be handed in directly.
pub trait SqlSession: Send + Sync {
    /// Execute one or more statements, discarding any rows.
    fn batch_execute(&self, sql: &str) -> impl Future<Output = RequestResult<()>> + Send;

    /// Execute a statement through the simple query protocol and collect its rows.
    fn simple_query(&self, sql: &str) -> impl Future<Output = RequestResult<QueryRows>> + Send;

    /// Execute a `COPY ... TO STDOUT` statement and collect the whole byte stream.
    fn copy_out(&self, sql: &str) -> impl Future<Output = RequestResult<Vec<u8>>> + Send;
}

impl SqlSession for tokio_postgres::Client {
    async fn batch_execute(&self, sql: &str) -> RequestResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(RequestError::from_db_error)
    }

    async fn simple_query(&self, sql: &str) -> RequestResult<QueryRows> {
        let messages = tokio_postgres::Client::simple_query(self, sql)
            .await
            .map_err(RequestError::from_db_error)?;
        Ok(QueryRows::from_messages(messages))
    }

    async fn copy_out(&self, sql: &str) -> RequestResult<Vec<u8>> {
        let stream = tokio_postgres::Client::copy_out(self, sql)
            .await
            .map_err(RequestError::from_db_error)?;
        pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await.map_err(RequestError::from_db_error)? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl SqlSession for tokio_postgres::Transaction<'_> {
    async fn batch_execute(&self, sql: &str) -> RequestResult<()> {
        tokio_postgres::Transaction::batch_execute(self, sql)
            .await
            .map_err(RequestError::from_db_error)
    }

    async fn simple_query(&self, sql: &str) -> RequestResult<QueryRows> {
        let messages = tokio_postgres::Transaction::simple_query(self, sql)
            .await
            .map_err(RequestError::from_db_error)?;
        Ok(QueryRows::from_messages(messages))
    }

    async fn copy_out(&self, sql: &str) -> RequestResult<Vec<u8>> {
        let stream = tokio_postgres::Transaction::copy_out(self, sql)
            .await
            .map_err(RequestError::from_db_error)?;
        pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await.map_err(RequestError::from_db_error)? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

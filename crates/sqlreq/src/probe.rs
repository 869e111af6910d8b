//! Column discovery through a throwaway view.
//!
//! The query is wrapped in `CREATE VIEW`, the catalog is read for the view's
//! columns, and the surrounding checkpoint is rolled back, so nothing persists.

use crate::error::{RequestError, RequestResult};
use crate::ident::{quote_ident, quote_literal};
use crate::request::ExecutionHook;
use crate::session::SqlSession;
use serde::Serialize;

/// One column of a query result, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Ordinal position, starting at 1.
    pub position: i32,
    pub name: String,
    /// `format_type` output, e.g. `character varying(20)`.
    pub sql_type: String,
}

/// Catalog query listing the live columns of `view_name` in ordinal order.
pub fn column_query(view_name: &str) -> String {
    format!(
        "SELECT attnum, attname AS column, format_type(atttypid, atttypmod) AS type \
         FROM pg_attribute \
         WHERE attrelid = {}::regclass AND NOT attisdropped AND attnum > 0 \
         ORDER BY attnum",
        quote_literal(&quote_ident(view_name))
    )
}

/// Read the column manifest of a view or table.
pub async fn introspect_columns<S: SqlSession>(
    session: &S,
    view_name: &str,
) -> RequestResult<Vec<ColumnInfo>> {
    let sql = column_query(view_name);
    tracing::info!(target: "sqlreq.sql", "Executing SQL Request {sql} ...");
    let rows = session.simple_query(&sql).await?;

    rows.rows
        .iter()
        .map(|row| {
            let cell = |i: usize| -> RequestResult<&str> {
                row.get(i).and_then(|v| v.as_deref()).ok_or_else(|| {
                    RequestError::Other(format!("catalog row for {view_name} is missing column {i}"))
                })
            };
            let position = cell(0)?.parse::<i32>().map_err(|e| {
                RequestError::Other(format!("invalid attnum for {view_name}: {e}"))
            })?;
            Ok(ColumnInfo {
                position,
                name: cell(1)?.to_string(),
                sql_type: cell(2)?.to_string(),
            })
        })
        .collect()
}

/// Validation hook that probes the query as a view and returns its columns.
#[derive(Debug, Clone)]
pub struct ViewProbe {
    view_name: String,
}

impl ViewProbe {
    pub fn new(view_name: impl Into<String>) -> Self {
        Self {
            view_name: view_name.into(),
        }
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }
}

impl ExecutionHook for ViewProbe {
    type Output = Vec<ColumnInfo>;

    fn prepare_check_query(&self, query: &str) -> String {
        format!("CREATE VIEW {} AS ({query})", quote_ident(&self.view_name))
    }

    async fn after_execute<S: SqlSession>(&mut self, session: &S) -> RequestResult<Vec<ColumnInfo>> {
        introspect_columns(session, &self.view_name).await
    }
}

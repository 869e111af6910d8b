//! DDL issued while materializing a view.
//!
//! Statements run on the ambient session and are logged at `info`, so an
//! operator can replay what happened from the application log.

use super::field::ViewField;
use crate::error::{RequestError, RequestResult};
use crate::ident::{quote_ident, quote_literal};
use crate::session::SqlSession;

fn kind(materialized: bool) -> &'static str {
    if materialized { "MATERIALIZED VIEW" } else { "VIEW" }
}

pub(crate) async fn log_execute<S: SqlSession>(session: &S, sql: &str) -> RequestResult<()> {
    tracing::info!(target: "sqlreq.sql", "Executing SQL Request {sql} ...");
    session.batch_execute(sql).await
}

async fn log_query<S: SqlSession>(session: &S, sql: &str) -> RequestResult<Option<String>> {
    tracing::info!(target: "sqlreq.sql", "Executing SQL Request {sql} ...");
    let rows = session.simple_query(sql).await?;
    Ok(rows.value(0, 0).map(str::to_string))
}

pub fn drop_view_sql(view_name: &str, materialized: bool) -> String {
    format!("DROP {} IF EXISTS {}", kind(materialized), quote_ident(view_name))
}

/// `CREATE [MATERIALIZED] VIEW` over `query`, with the bookkeeping columns the
/// generated model expects prepended.
pub fn create_view_sql(view_name: &str, query: &str, materialized: bool) -> String {
    format!(
        "CREATE {} {} AS (\
         SELECT CAST(row_number() OVER () AS integer) AS id, \
         CAST(NULL AS timestamp without time zone) AS create_date, \
         CAST(NULL AS integer) AS create_uid, \
         CAST(NULL AS timestamp without time zone) AS write_date, \
         CAST(NULL AS integer) AS write_uid, \
         my_query.* FROM ({query}) AS my_query)",
        kind(materialized),
        quote_ident(view_name)
    )
}

pub fn create_index_sql(view_name: &str, field: &ViewField) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&field.index_name(view_name)),
        quote_ident(view_name),
        quote_ident(&field.name)
    )
}

pub fn refresh_sql(view_name: &str) -> String {
    format!("REFRESH MATERIALIZED VIEW {}", quote_ident(view_name))
}

pub fn size_sql(view_name: &str) -> String {
    format!(
        "SELECT pg_size_pretty(pg_total_relation_size({}))",
        quote_literal(&quote_ident(view_name))
    )
}

pub fn table_exists_sql(name: &str) -> String {
    format!(
        "SELECT 1 FROM pg_class WHERE relkind = 'r' AND relname = {}",
        quote_literal(name)
    )
}

pub async fn drop_view<S: SqlSession>(
    session: &S,
    view_name: &str,
    materialized: bool,
) -> RequestResult<()> {
    log_execute(session, &drop_view_sql(view_name, materialized)).await
}

/// Drop then create the view. Creation errors carry the view name and kind.
pub async fn create_view<S: SqlSession>(
    session: &S,
    view_name: &str,
    query: &str,
    materialized: bool,
) -> RequestResult<()> {
    drop_view(session, view_name, materialized).await?;
    log_execute(session, &create_view_sql(view_name, query, materialized))
        .await
        .map_err(|e| match e {
            RequestError::Database(message) => RequestError::ViewCreation {
                kind: if materialized { "MATERIALIZED" } else { "" },
                view_name: view_name.to_string(),
                message,
            },
            other => other,
        })
}

/// Create one index per field flagged `is_index`.
pub async fn create_indexes<S: SqlSession>(
    session: &S,
    view_name: &str,
    fields: &[ViewField],
) -> RequestResult<()> {
    for field in fields.iter().filter(|f| f.is_index) {
        log_execute(session, &create_index_sql(view_name, field)).await?;
    }
    Ok(())
}

pub async fn refresh_view<S: SqlSession>(session: &S, view_name: &str) -> RequestResult<()> {
    log_execute(session, &refresh_sql(view_name)).await
}

/// Human-readable on-disk size of the view and its indexes.
pub async fn relation_size<S: SqlSession>(session: &S, view_name: &str) -> RequestResult<Option<String>> {
    log_query(session, &size_sql(view_name)).await
}

/// Drop a plain table named like the view, if one exists.
pub async fn drop_table_if_exists<S: SqlSession>(session: &S, name: &str) -> RequestResult<bool> {
    if log_query(session, &table_exists_sql(name)).await?.is_none() {
        return Ok(false);
    }
    log_execute(session, &format!("DROP TABLE {}", quote_ident(name))).await?;
    Ok(true)
}

//! Named savepoints used to run requests without leaving side effects.
//!
//! A checkpoint is created with `SAVEPOINT <name>` on a session that already runs
//! inside a transaction, and is undone with `ROLLBACK TO SAVEPOINT <name>`.
//! Names follow `<entity_with_underscores>_<32 hex chars>`, e.g.
//! `bi_sql_view_9f0c5b1f6a0d4e4c8a3b2d1e0f9a8b7c`.
//!
//! # Example
//!
//! ```ignore
//! let checkpoint = Checkpoint::create(&tx, "bi.sql.view").await?;
//! let result = tx.simple_query(&sql).await;
//! let rollback = checkpoint.rollback(&tx).await;
//! let rows = sqlreq::checkpoint::settle(result, rollback)?;
//! ```

use crate::error::{RequestError, RequestResult};
use crate::session::SqlSession;
use uuid::Uuid;

/// Build a unique checkpoint name for an entity type such as `bi.sql.view`.
pub fn checkpoint_name(entity: &str) -> String {
    format!("{}_{}", entity.replace('.', "_"), Uuid::new_v4().simple())
}

/// A savepoint created on a session.
///
/// Consumed by [`Checkpoint::rollback`] or [`Checkpoint::release`]. Dropping it
/// without either leaves the savepoint in place until the transaction ends.
#[derive(Debug)]
#[must_use = "a checkpoint must be rolled back or released"]
pub struct Checkpoint {
    name: String,
}

impl Checkpoint {
    /// Create a uniquely named savepoint for `entity` on `session`.
    pub async fn create<S: SqlSession>(session: &S, entity: &str) -> RequestResult<Self> {
        let name = checkpoint_name(entity);
        session.batch_execute(&format!("SAVEPOINT {name}")).await?;
        Ok(Self { name })
    }

    /// Returns the savepoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Undo everything executed since the savepoint.
    pub async fn rollback<S: SqlSession>(self, session: &S) -> RequestResult<()> {
        session
            .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", self.name))
            .await
    }

    /// Keep the work done since the savepoint.
    pub async fn release<S: SqlSession>(self, session: &S) -> RequestResult<()> {
        session
            .batch_execute(&format!("RELEASE SAVEPOINT {}", self.name))
            .await
    }
}

/// Combine the outcome of a checkpointed body with the outcome of its cleanup.
///
/// The body error wins; a cleanup failure is appended to it. A cleanup failure
/// after a successful body is returned as is.
pub fn settle<T>(result: RequestResult<T>, cleanup: RequestResult<()>) -> RequestResult<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(cleanup_err)) => Err(RequestError::Other(format!(
            "{error} (savepoint rollback failed: {cleanup_err})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;

    #[test]
    fn name_uses_entity_and_32_hex_chars() {
        let name = checkpoint_name("bi.sql.view");
        let suffix = name.strip_prefix("bi_sql_view_").unwrap();
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn names_are_unique() {
        assert_ne!(checkpoint_name("sql.export"), checkpoint_name("sql.export"));
    }

    #[tokio::test]
    async fn rollback_targets_the_created_savepoint() {
        let session = ScriptedSession::new();
        let checkpoint = Checkpoint::create(&session, "sql.export").await.unwrap();
        let name = checkpoint.name().to_string();
        checkpoint.rollback(&session).await.unwrap();

        assert_eq!(
            session.statements(),
            vec![
                format!("SAVEPOINT {name}"),
                format!("ROLLBACK TO SAVEPOINT {name}")
            ]
        );
    }

    #[test]
    fn settle_keeps_body_error_and_mentions_cleanup_failure() {
        let out: RequestResult<()> = settle(
            Err(RequestError::Database("syntax error".into())),
            Err(RequestError::Database("no such savepoint".into())),
        );
        let msg = out.unwrap_err().to_string();
        assert!(msg.contains("syntax error"));
        assert!(msg.contains("savepoint rollback failed"));
    }

    #[test]
    fn settle_passes_success_through() {
        assert_eq!(settle(Ok(7), Ok(())).unwrap(), 7);
    }
}

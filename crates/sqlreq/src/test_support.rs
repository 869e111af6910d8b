//! Scripted session fakes shared by the unit tests.

use crate::error::{RequestError, RequestResult};
use crate::external::ExternalConnector;
use crate::session::{QueryRows, SqlSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Reply {
    Rows(QueryRows),
    Copy(Vec<u8>),
    Fail(String),
}

/// A session that records every statement and answers by substring match.
///
/// The first matching rule wins; unmatched queries return no rows.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    log: Arc<Mutex<Vec<String>>>,
    rules: Arc<Mutex<Vec<(String, Reply)>>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_query(self, needle: &str, rows: QueryRows) -> Self {
        self.push_rule(needle, Reply::Rows(rows));
        self
    }

    pub fn on_copy(self, needle: &str, bytes: &[u8]) -> Self {
        self.push_rule(needle, Reply::Copy(bytes.to_vec()));
        self
    }

    pub fn fail_on(self, needle: &str, message: &str) -> Self {
        self.push_rule(needle, Reply::Fail(message.to_string()));
        self
    }

    /// Answer the catalog introspection query with the given columns.
    pub fn with_catalog(self, columns: &[(i32, &str, &str)]) -> Self {
        let rows = columns
            .iter()
            .map(|(pos, name, ty)| {
                vec![
                    Some(pos.to_string()),
                    Some(name.to_string()),
                    Some(ty.to_string()),
                ]
            })
            .collect();
        self.on_query(
            "FROM pg_attribute",
            QueryRows::new(
                vec!["attnum".into(), "column".into(), "type".into()],
                rows,
            ),
        )
    }

    pub fn with_server_version(self, version: &str) -> Self {
        self.on_query(
            "SHOW server_version",
            QueryRows::new(
                vec!["server_version".into()],
                vec![vec![Some(version.to_string())]],
            ),
        )
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn push_rule(&self, needle: &str, reply: Reply) {
        self.rules.lock().unwrap().push((needle.to_string(), reply));
    }

    fn record(&self, sql: &str) -> Option<Reply> {
        self.log.lock().unwrap().push(sql.to_string());
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

impl SqlSession for ScriptedSession {
    async fn batch_execute(&self, sql: &str) -> RequestResult<()> {
        match self.record(sql) {
            Some(Reply::Fail(message)) => Err(RequestError::Database(message)),
            _ => Ok(()),
        }
    }

    async fn simple_query(&self, sql: &str) -> RequestResult<QueryRows> {
        match self.record(sql) {
            Some(Reply::Fail(message)) => Err(RequestError::Database(message)),
            Some(Reply::Rows(rows)) => Ok(rows),
            _ => Ok(QueryRows::default()),
        }
    }

    async fn copy_out(&self, sql: &str) -> RequestResult<Vec<u8>> {
        match self.record(sql) {
            Some(Reply::Fail(message)) => Err(RequestError::Database(message)),
            Some(Reply::Copy(bytes)) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }
}

/// Hands out clones of one scripted session and counts connects and closes.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    pub session: ScriptedSession,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(session: ScriptedSession) -> Self {
        Self {
            session,
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ExternalConnector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, _url: &str) -> RequestResult<ScriptedSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }

    async fn close(&self, _session: ScriptedSession, _commit: bool) -> RequestResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn rows(columns: &[&str], data: &[&[Option<&str>]]) -> QueryRows {
    QueryRows::new(
        columns.iter().map(|c| c.to_string()).collect(),
        data.iter()
            .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
            .collect(),
    )
}

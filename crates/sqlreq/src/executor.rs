//! Running validated requests.
//!
//! Every execution (except view creation) happens inside a uniquely named
//! checkpoint that is rolled back afterwards, whether the statement succeeded or
//! not. Creating a view forces the rollback off, since the view must persist.

use crate::checkpoint::{Checkpoint, settle};
use crate::context::ExecContext;
use crate::error::{RequestError, RequestResult};
use crate::external::ExternalConnector;
use crate::ident::quote_ident;
use crate::params::QueryParams;
use crate::request::{RequestState, SqlRequest};
use crate::session::SqlSession;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::str::FromStr;

pub const DEFAULT_COPY_OPTIONS: &str = "CSV HEADER DELIMITER ';'";

/// Number of rows shown by [`SqlRequest::preview`].
pub const PREVIEW_ROWS: usize = 100;

/// What an execution produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    /// All rows, optionally preceded by a header row of column names.
    Fetchall,
    /// The first row.
    Fetchone,
    /// `COPY (...) TO STDOUT`, base64-encoded.
    Stdout,
    /// `CREATE VIEW` named by [`ExecOptions::view_name`].
    View,
    /// `CREATE MATERIALIZED VIEW` named by [`ExecOptions::view_name`].
    MaterializedView,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetchall => "fetchall",
            Self::Fetchone => "fetchone",
            Self::Stdout => "stdout",
            Self::View => "view",
            Self::MaterializedView => "materialized_view",
        }
    }

    /// View modes persist their result and never roll back.
    pub fn creates_view(&self) -> bool {
        matches!(self, Self::View | Self::MaterializedView)
    }
}

impl FromStr for ExecMode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetchall" => Ok(Self::Fetchall),
            "fetchone" => Ok(Self::Fetchone),
            "stdout" => Ok(Self::Stdout),
            "view" => Ok(Self::View),
            "materialized_view" => Ok(Self::MaterializedView),
            other => Err(RequestError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`SqlRequest::execute`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub params: QueryParams,
    /// Roll back to the checkpoint afterwards. Ignored for view modes.
    pub rollback: bool,
    /// Prefix `fetchall` results with a row of column names.
    pub header: bool,
    /// Options appended to `COPY ... TO STDOUT WITH`.
    pub copy_options: String,
    pub view_name: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            params: QueryParams::new(),
            rollback: true,
            header: false,
            copy_options: DEFAULT_COPY_OPTIONS.to_string(),
            view_name: None,
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn copy_options(mut self, copy_options: impl Into<String>) -> Self {
        self.copy_options = copy_options.into();
        self
    }

    pub fn view_name(mut self, view_name: impl Into<String>) -> Self {
        self.view_name = Some(view_name.into());
        self
    }
}

pub type TextRow = Vec<Option<String>>;

/// Result of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutput {
    Rows(Vec<TextRow>),
    Row(Option<TextRow>),
    /// Base64 of the `COPY` byte stream.
    Stdout(String),
    ViewCreated,
}

impl ExecOutput {
    pub fn into_rows(self) -> Option<Vec<TextRow>> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Decoded `COPY` bytes.
    pub fn stdout_bytes(&self) -> RequestResult<Option<Vec<u8>>> {
        match self {
            Self::Stdout(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| RequestError::Serialization(e.to_string())),
            _ => Ok(None),
        }
    }
}

/// PostgreSQL server version as `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    /// First version with materialized views.
    pub const MATERIALIZED_VIEWS: Self = Self { major: 9, minor: 3 };

    /// Parse the output of `SHOW server_version`, e.g. `15.4 (Debian 15.4-1)`.
    pub fn parse(raw: &str) -> RequestResult<Self> {
        let token = raw.split_whitespace().next().unwrap_or_default();
        let mut parts = token.split('.');
        let major = parts
            .next()
            .and_then(|p| leading_digits(p).parse().ok())
            .ok_or_else(|| RequestError::Other(format!("unrecognized server version: {raw}")))?;
        let minor = parts
            .next()
            .and_then(|p| leading_digits(p).parse().ok())
            .unwrap_or(0);
        Ok(Self { major, minor })
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn leading_digits(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

/// Fail unless the server supports materialized views.
pub async fn check_materialized_view_available<S: SqlSession>(session: &S) -> RequestResult<()> {
    let rows = session.simple_query("SHOW server_version").await?;
    let raw = rows
        .value(0, 0)
        .ok_or_else(|| RequestError::Other("SHOW server_version returned nothing".to_string()))?;
    let version = ServerVersion::parse(raw)?;
    if version < ServerVersion::MATERIALIZED_VIEWS {
        return Err(RequestError::MaterializedViewUnsupported(version.to_string()));
    }
    Ok(())
}

impl SqlRequest {
    /// Execute the validated request.
    ///
    /// Refused on drafts. Parameters are substituted before the statement is
    /// wrapped for the requested mode.
    pub async fn execute<S, C>(
        &self,
        ctx: &ExecContext<'_, S, C>,
        mode: ExecMode,
        options: ExecOptions,
    ) -> RequestResult<ExecOutput>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        if self.state() == RequestState::Draft {
            return Err(RequestError::NotChecked);
        }

        let rollback = options.rollback && !mode.creates_view();
        let query = options.params.render(self.query())?;
        let sql = match mode {
            ExecMode::Fetchall | ExecMode::Fetchone => query,
            ExecMode::Stdout => format!("COPY ({query}) TO STDOUT WITH {}", options.copy_options),
            ExecMode::View | ExecMode::MaterializedView => {
                let view_name = options.view_name.as_deref().ok_or_else(|| {
                    RequestError::validation(format!("Mode '{mode}' requires a view name"))
                })?;
                let kind = if mode == ExecMode::MaterializedView {
                    "MATERIALIZED VIEW"
                } else {
                    "VIEW"
                };
                format!("CREATE {kind} {} AS ({query})", quote_ident(view_name))
            }
        };

        let target = ctx.open(self.use_external_database()).await?;
        if mode == ExecMode::MaterializedView {
            if let Err(e) = check_materialized_view_available(&target).await {
                return settle(Err(e), ctx.close(target, false).await);
            }
        }

        let checkpoint = if rollback {
            match Checkpoint::create(&target, self.entity()).await {
                Ok(checkpoint) => Some(checkpoint),
                Err(e) => return settle(Err(e), ctx.close(target, false).await),
            }
        } else {
            None
        };

        let result = run_mode(&target, mode, &sql, options.header).await;

        let cleanup = match checkpoint {
            Some(checkpoint) => checkpoint.rollback(&target).await,
            None => Ok(()),
        };
        let closed = ctx.close(target, !rollback && result.is_ok()).await;
        settle(settle(result, cleanup), closed)
    }

    /// Validate, then return up to [`PREVIEW_ROWS`] rows rendered as text lines.
    pub async fn preview<S, C>(&mut self, ctx: &ExecContext<'_, S, C>) -> RequestResult<Vec<String>>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        self.validate(ctx, &mut crate::request::PlainCheck).await?;
        let rows = self
            .execute(ctx, ExecMode::Fetchall, ExecOptions::default())
            .await?
            .into_rows()
            .unwrap_or_default();
        Ok(rows.iter().take(PREVIEW_ROWS).map(|r| format_row(r)).collect())
    }
}

async fn run_mode<S: SqlSession>(
    session: &S,
    mode: ExecMode,
    sql: &str,
    header: bool,
) -> RequestResult<ExecOutput> {
    match mode {
        ExecMode::Fetchall => {
            let result = session.simple_query(sql).await?;
            let mut rows = Vec::with_capacity(result.rows.len() + usize::from(header));
            if header {
                rows.push(result.columns.into_iter().map(Some).collect());
            }
            rows.extend(result.rows);
            Ok(ExecOutput::Rows(rows))
        }
        ExecMode::Fetchone => {
            let result = session.simple_query(sql).await?;
            Ok(ExecOutput::Row(result.rows.into_iter().next()))
        }
        ExecMode::Stdout => {
            let bytes = session.copy_out(sql).await?;
            Ok(ExecOutput::Stdout(BASE64.encode(bytes)))
        }
        ExecMode::View | ExecMode::MaterializedView => {
            session.batch_execute(sql).await?;
            Ok(ExecOutput::ViewCreated)
        }
    }
}

/// Render a row the way an interactive SQL shell shows a tuple.
pub fn format_row(row: &[Option<String>]) -> String {
    let cells: Vec<&str> = row.iter().map(|v| v.as_deref().unwrap_or("NULL")).collect();
    format!("({})", cells.join(", "))
}

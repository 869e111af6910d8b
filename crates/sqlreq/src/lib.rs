//! # sqlreq
//!
//! Safety-gated free-text SQL requests for PostgreSQL, with two consumers built on
//! top: file exports and BI views materialized into the database.
//!
//! ## Features
//!
//! - **Validation pipeline**: terminator stripping, a prohibited-word blacklist and
//!   an execution probe that always runs inside a rolled-back savepoint
//! - **Execution modes**: `fetchall`, `fetchone`, `stdout` (`COPY ... TO STDOUT`),
//!   `view` and `materialized_view`
//! - **External databases**: any request can target a configured secondary database
//! - **Exports**: CSV and JSON files through pluggable [`ExportStrategy`]s
//! - **SQL views**: `draft -> sql_valid -> model_valid -> ui_valid`, with generated
//!   model, access, rule, refresh task, presentation views, action and menu
//!
//! ## Validating and running a request
//!
//! ```ignore
//! use sqlreq::{ExecContext, ExecMode, ExecOptions, PlainCheck, SqlRequest, SqlRequestConfig};
//!
//! let config = SqlRequestConfig::load("sqlreq.toml")?;
//! let ctx = ExecContext::new(&tx, &config);
//!
//! let mut request = SqlRequest::new("sql.export", "Partners", "SELECT name FROM res_partner;", &config);
//! request.validate(&ctx, &mut PlainCheck).await?;
//! let rows = request.execute(&ctx, ExecMode::Fetchall, ExecOptions::new()).await?;
//! ```
//!
//! Durable side effects outside the database (models, menus, scheduled tasks)
//! go through the [`Collaborators`] traits; [`InMemoryBackend`] implements all
//! of them.

pub mod checkpoint;
pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod export;
pub mod external;
pub mod ident;
pub mod memory;
pub mod params;
pub mod probe;
pub mod request;
pub mod sanitize;
pub mod session;
pub mod view;

#[cfg(test)]
mod test_support;

pub use checkpoint::{Checkpoint, settle};
pub use collab::{
    ArtifactId, Collaborators, SchedulerCapability, SchemaCapability, UiCapability,
};
pub use config::SqlRequestConfig;
pub use context::ExecContext;
pub use error::{RequestError, RequestResult};
pub use executor::{ExecMode, ExecOptions, ExecOutput, ServerVersion, format_row};
pub use export::{
    CsvExport, ExportEnv, ExportFormat, ExportRegistry, ExportStrategy, ExportedFile, JsonExport,
    SqlExport,
};
pub use external::{ExternalConnector, NoExternal, PgConnector};
pub use memory::InMemoryBackend;
pub use params::{ParamValue, QueryParams};
pub use probe::{ColumnInfo, ViewProbe};
pub use request::{Capabilities, ExecutionHook, PlainCheck, RequestState, SqlRequest};
pub use sanitize::{QueryGuard, check_prohibited_words, clean_query};
pub use session::{QueryRows, SqlSession};
pub use view::{SqlView, ViewArtifacts, ViewField, ViewKind, ViewOrder};

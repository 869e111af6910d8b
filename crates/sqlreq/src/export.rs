//! File exports of SQL requests.
//!
//! Each output format is an [`ExportStrategy`] registered in an
//! [`ExportRegistry`] under its [`ExportFormat`]. A strategy decides how the
//! request is executed and turns the execution output into file bytes.

use crate::config::SqlRequestConfig;
use crate::context::ExecContext;
use crate::error::{RequestError, RequestResult};
use crate::executor::{ExecMode, ExecOptions, ExecOutput};
use crate::external::ExternalConnector;
use crate::ident::quote_literal;
use crate::params::{ParamValue, QueryParams};
use crate::request::{Capabilities, PlainCheck, SqlRequest};
use crate::session::SqlSession;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Entity type of exports; also the checkpoint name prefix.
pub const EXPORT_ENTITY: &str = "sql.export";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one file format is produced.
pub trait ExportStrategy: Send + Sync {
    fn format(&self) -> ExportFormat;

    /// File extension, without the dot.
    fn extension(&self) -> &'static str;

    /// Execution mode and options; parameters are filled in by the caller.
    fn plan(&self, export: &SqlExport) -> (ExecMode, ExecOptions);

    /// Turn the execution output into file content.
    fn render(&self, export: &SqlExport, output: ExecOutput) -> RequestResult<Vec<u8>>;
}

/// `COPY ... TO STDOUT` with the export's header and delimiter settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExport;

impl CsvExport {
    pub fn copy_options(export: &SqlExport) -> String {
        let mut options = String::from("CSV");
        if export.header {
            options.push_str(" HEADER");
        }
        options.push_str(" DELIMITER ");
        options.push_str(&quote_literal(&export.delimiter.to_string()));
        options
    }
}

impl ExportStrategy for CsvExport {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn plan(&self, export: &SqlExport) -> (ExecMode, ExecOptions) {
        (
            ExecMode::Stdout,
            ExecOptions::new().copy_options(Self::copy_options(export)),
        )
    }

    fn render(&self, _export: &SqlExport, output: ExecOutput) -> RequestResult<Vec<u8>> {
        output
            .stdout_bytes()?
            .ok_or_else(|| RequestError::Other("CSV export expects COPY output".to_string()))
    }
}

/// Array of objects keyed by column name. Values are kept as text.
///
/// Column names must be unique, since each one becomes an object key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExport;

impl ExportStrategy for JsonExport {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn plan(&self, _export: &SqlExport) -> (ExecMode, ExecOptions) {
        (ExecMode::Fetchall, ExecOptions::new().header(true))
    }

    fn render(&self, _export: &SqlExport, output: ExecOutput) -> RequestResult<Vec<u8>> {
        let mut rows = output
            .into_rows()
            .ok_or_else(|| RequestError::Other("JSON export expects rows".to_string()))?
            .into_iter();
        let columns: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(RequestError::validation(format!(
                "Column '{dup}' appears more than once; JSON exports need unique column names"
            )));
        }

        let records: Vec<Value> = rows
            .map(|row| {
                let object: Map<String, Value> = columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(|v| v.map_or(Value::Null, Value::String)))
                    .collect();
                Value::Object(object)
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&records)?)
    }
}

/// Strategies by format.
#[derive(Default)]
pub struct ExportRegistry {
    strategies: HashMap<ExportFormat, Box<dyn ExportStrategy>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the CSV and JSON strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CsvExport);
        registry.register(JsonExport);
        registry
    }

    /// Register `strategy`, replacing any previous one for its format.
    pub fn register(&mut self, strategy: impl ExportStrategy + 'static) {
        self.strategies.insert(strategy.format(), Box::new(strategy));
    }

    pub fn get(&self, format: ExportFormat) -> RequestResult<&dyn ExportStrategy> {
        self.strategies
            .get(&format)
            .map(|s| s.as_ref())
            .ok_or_else(|| RequestError::config(format!("No export strategy registered for '{format}'")))
    }

    pub fn formats(&self) -> impl Iterator<Item = ExportFormat> + '_ {
        self.strategies.keys().copied()
    }
}

/// Caller identity and clock used to fill implicit parameters and the file name.
#[derive(Debug, Clone, Copy)]
pub struct ExportEnv {
    pub company_id: i64,
    pub user_id: i64,
    /// Local time of the caller.
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// A SQL request that can be downloaded as a file.
#[derive(Debug, Clone)]
pub struct SqlExport {
    request: SqlRequest,
    pub file_format: ExportFormat,
    pub header: bool,
    delimiter: char,
    /// Parameters the caller must provide on every export.
    properties: Vec<String>,
}

impl SqlExport {
    /// Create a draft CSV export with a header and `;` as delimiter.
    ///
    /// The execution probe is disabled: the body usually holds `%(name)s`
    /// placeholders that only get values at export time.
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        config: &SqlRequestConfig,
    ) -> Self {
        Self {
            request: SqlRequest::new(EXPORT_ENTITY, name, query, config).with_capabilities(
                Capabilities {
                    check_execution: false,
                    ..Capabilities::ALL
                },
            ),
            file_format: ExportFormat::Csv,
            header: true,
            delimiter: ';',
            properties: Vec::new(),
        }
    }

    pub fn request(&self) -> &SqlRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut SqlRequest {
        &mut self.request
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn set_delimiter(&mut self, delimiter: char) -> RequestResult<()> {
        if matches!(delimiter, '\n' | '\r' | '"') {
            return Err(RequestError::validation(format!(
                "'{}' cannot be used as a CSV delimiter",
                delimiter.escape_default()
            )));
        }
        self.delimiter = delimiter;
        Ok(())
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Declare a parameter the caller must fill in.
    pub fn add_property(&mut self, name: impl Into<String>) -> RequestResult<()> {
        let name = name.into();
        if name.is_empty() || !name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
            return Err(RequestError::validation(format!(
                "Invalid property name '{name}'"
            )));
        }
        if !self.properties.contains(&name) {
            self.properties.push(name);
        }
        Ok(())
    }

    pub async fn validate<S, C>(&mut self, ctx: &ExecContext<'_, S, C>) -> RequestResult<()>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        self.request.validate(ctx, &mut PlainCheck).await?;
        Ok(())
    }

    /// Parameters for one export: the declared properties from `values`, plus
    /// `company_id` and `user_id` when the body references them.
    pub fn collect_params(&self, values: &QueryParams, env: &ExportEnv) -> RequestResult<QueryParams> {
        let missing: Vec<&str> = self
            .properties
            .iter()
            .filter(|p| !values.get(p).is_some_and(ParamValue::is_set))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(RequestError::validation(format!(
                "Please enter a values for the following properties : {}",
                missing.join(",")
            )));
        }

        let mut params = values.clone();
        let query = self.request.query();
        if query.contains("%(company_id)s") {
            params.insert("company_id", env.company_id);
        }
        if query.contains("%(user_id)s") {
            params.insert("user_id", env.user_id);
        }
        Ok(params)
    }

    /// Run the export and return the file.
    pub async fn export<S, C>(
        &self,
        ctx: &ExecContext<'_, S, C>,
        registry: &ExportRegistry,
        values: &QueryParams,
        env: &ExportEnv,
    ) -> RequestResult<ExportedFile>
    where
        S: SqlSession,
        C: ExternalConnector,
    {
        let params = self.collect_params(values, env)?;
        let strategy = registry.get(self.file_format)?;
        let (mode, options) = strategy.plan(self);

        let output = self.request.execute(ctx, mode, options.params(params)).await?;
        let content = strategy.render(self, output)?;
        tracing::debug!(
            target: "sqlreq.sql",
            export = %self.request.name,
            format = %self.file_format,
            bytes = content.len(),
            "export rendered"
        );

        Ok(ExportedFile {
            file_name: format!(
                "{}_{}.{}",
                self.request.name,
                env.now.format("%Y-%m-%d %H:%M:%S"),
                strategy.extension()
            ),
            content,
        })
    }
}

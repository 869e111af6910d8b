//! Engine configuration loaded from TOML.
//!
//! ```toml
//! external_db_name = "warehouse"
//!
//! [external_databases.warehouse]
//! url = "${WAREHOUSE_URL}"
//!
//! [refresh]
//! interval_days = 1
//!
//! [views]
//! parent_menu = "bi_sql_editor.menu_bi_sql_editor"
//! default_groups = ["sql_request_abstract.group_sql_request_user"]
//! view_order = "pivot,graph,list"
//! ```

use crate::error::{RequestError, RequestResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_GROUP: &str = "sql_request_abstract.group_sql_request_user";
pub const DEFAULT_PARENT_MENU: &str = "bi_sql_editor.menu_bi_sql_editor";
pub const DEFAULT_VIEW_ORDER: &str = "pivot,graph,list";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqlRequestConfig {
    /// Identifier of the external database used by `use_external_database` requests.
    #[serde(default)]
    pub external_db_name: Option<String>,

    #[serde(default)]
    pub external_databases: BTreeMap<String, ExternalDatabaseConfig>,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub views: ViewDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalDatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
}

fn default_interval_days() -> u32 {
    1
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_days: default_interval_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewDefaults {
    #[serde(default = "default_parent_menu")]
    pub parent_menu: String,
    #[serde(default = "default_groups")]
    pub default_groups: Vec<String>,
    #[serde(default = "default_view_order")]
    pub view_order: String,
}

fn default_parent_menu() -> String {
    DEFAULT_PARENT_MENU.to_string()
}

fn default_groups() -> Vec<String> {
    vec![DEFAULT_GROUP.to_string()]
}

fn default_view_order() -> String {
    DEFAULT_VIEW_ORDER.to_string()
}

impl Default for ViewDefaults {
    fn default() -> Self {
        Self {
            parent_menu: default_parent_menu(),
            default_groups: default_groups(),
            view_order: default_view_order(),
        }
    }
}

impl SqlRequestConfig {
    /// Read, expand and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> RequestResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RequestError::config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            RequestError::Config(msg) => {
                RequestError::config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse, expand and validate config text.
    pub fn from_toml_str(raw: &str) -> RequestResult<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.expand_env()?;
        config.validate()?;
        Ok(config)
    }

    /// URL of the configured external database.
    ///
    /// Fails when no external database is configured at all, which is what the
    /// `use_external_database` constraint checks.
    pub fn external_database_url(&self) -> RequestResult<(&str, &str)> {
        let name = self.external_db_name.as_deref().ok_or_else(|| {
            RequestError::config(
                "You can't use an external database as there are no such configuration \
                 about this. Please contact your administrator to solve this issue.",
            )
        })?;
        let db = self.external_databases.get(name).ok_or_else(|| {
            RequestError::config(format!("external database '{name}' has no url configured"))
        })?;
        Ok((name, db.url.as_str()))
    }

    fn expand_env(&mut self) -> RequestResult<()> {
        if let Some(name) = self.external_db_name.as_mut() {
            *name = expand_env_vars(name)?;
        }
        for db in self.external_databases.values_mut() {
            db.url = expand_env_vars(&db.url)?;
        }
        self.views.parent_menu = expand_env_vars(&self.views.parent_menu)?;
        for g in &mut self.views.default_groups {
            *g = expand_env_vars(g)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> RequestResult<()> {
        if let Some(name) = &self.external_db_name {
            if name.trim().is_empty() {
                return Err(RequestError::config("external_db_name must not be empty"));
            }
            if !self.external_databases.contains_key(name) {
                return Err(RequestError::config(format!(
                    "external_db_name '{name}' has no [external_databases.{name}] entry"
                )));
            }
        }
        for (name, db) in &self.external_databases {
            if db.url.trim().is_empty() {
                return Err(RequestError::config(format!(
                    "external_databases.{name}.url must not be empty"
                )));
            }
        }
        if self.refresh.interval_days == 0 {
            return Err(RequestError::config("refresh.interval_days must be at least 1"));
        }
        if self.views.parent_menu.trim().is_empty() {
            return Err(RequestError::config("views.parent_menu must not be empty"));
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> RequestResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                return Err(RequestError::config(format!(
                    "unterminated env var reference: ${{{key}}}"
                )));
            }
            if key.is_empty() {
                return Err(RequestError::config("invalid env var reference: ${}"));
            }

            let v = std::env::var(&key).map_err(|_| {
                RequestError::config(format!("missing env var for config expansion: {key}"))
            })?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}

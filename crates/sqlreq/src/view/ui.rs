//! Presentation documents, action context and view ordering.

use super::field::{GraphType, ViewField};
use crate::error::{RequestError, RequestResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::str::FromStr;

/// Kind of presentation view generated for a SQL view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    List,
    Graph,
    Pivot,
    Search,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Graph => "graph",
            Self::Pivot => "pivot",
            Self::Search => "search",
        }
    }
}

/// Ordered subset of `graph`, `pivot` and `list`, stored comma-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOrder(Vec<ViewKind>);

impl ViewOrder {
    pub fn kinds(&self) -> &[ViewKind] {
        &self.0
    }

    /// View opened by default.
    pub fn first(&self) -> ViewKind {
        self.0.first().copied().unwrap_or(ViewKind::Pivot)
    }
}

impl FromStr for ViewOrder {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = s
            .split(',')
            .map(|token| match token {
                "graph" => Ok(ViewKind::Graph),
                "pivot" => Ok(ViewKind::Pivot),
                "list" => Ok(ViewKind::List),
                _ => Err(RequestError::validation(
                    "Only graph, pivot or list views are supported",
                )),
            })
            .collect::<RequestResult<Vec<_>>>()?;
        Ok(Self(kinds))
    }
}

impl std::fmt::Display for ViewOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(ViewKind::as_str).collect();
        f.write_str(&names.join(","))
    }
}

const XML_DECL: &str = r#"<?xml version="1.0"?>"#;

fn concat(fields: &[ViewField], fragment: impl Fn(&ViewField) -> String) -> String {
    fields
        .iter()
        .filter(|f| f.is_user_facing())
        .map(fragment)
        .collect()
}

/// Arch of the view of kind `kind` over `fields`.
pub fn build_arch(kind: ViewKind, fields: &[ViewField]) -> String {
    match kind {
        ViewKind::List => format!(
            r#"{XML_DECL}<list name="Analysis">{}</list>"#,
            concat(fields, ViewField::tree_markup)
        ),
        ViewKind::Graph => format!(
            r#"{XML_DECL}<graph string="Analysis" type="bar" stacked="True">{}</graph>"#,
            concat(fields, ViewField::graph_markup)
        ),
        ViewKind::Pivot => format!(
            r#"{XML_DECL}<pivot string="Analysis" stacked="True">{}</pivot>"#,
            concat(fields, ViewField::pivot_markup)
        ),
        ViewKind::Search => format!(
            r#"{XML_DECL}<search string="Analysis">{}<group expand="1" string="Group By">{}</group></search>"#,
            concat(fields, ViewField::search_markup),
            concat(fields, ViewField::search_filter_markup)
        ),
    }
}

/// Synthetic measure counting rows.
pub const COUNT_MEASURE: &str = "__count__";

/// Default action context derived from each field's graph axis.
pub fn computed_action_context(fields: &[ViewField]) -> Map<String, Value> {
    let names = |axis: GraphType| {
        fields
            .iter()
            .filter(|f| f.is_user_facing() && f.graph_type == Some(axis))
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
    };
    let mut measures = names(GraphType::Measure);
    if measures.is_empty() {
        measures.push(COUNT_MEASURE);
    }

    let mut context = Map::new();
    context.insert("pivot_measures".into(), json!(measures));
    context.insert("pivot_row_groupby".into(), json!(names(GraphType::Row)));
    context.insert("pivot_column_groupby".into(), json!(names(GraphType::Col)));
    context
}

const STRING_LIST_KEYS: &[&str] = &[
    "pivot_measures",
    "pivot_row_groupby",
    "pivot_column_groupby",
    "graph_groupbys",
    "group_by",
];

/// User-supplied overrides of the action context.
///
/// Only a fixed set of keys is accepted, each with a fixed value shape; the
/// overlay is data, never evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextOverlay(Map<String, Value>);

impl ContextOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and check a JSON object. Empty input yields an empty overlay.
    pub fn parse(raw: &str) -> RequestResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RequestError::validation(format!("Action context is not valid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(RequestError::validation("Action context must be a JSON object"));
        };
        for (key, value) in &map {
            check_entry(key, value)?;
        }
        Ok(Self(map))
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay onto `base`, replacing keys present in both.
    pub fn apply(&self, mut base: Map<String, Value>) -> Map<String, Value> {
        for (key, value) in &self.0 {
            base.insert(key.clone(), value.clone());
        }
        base
    }
}

impl std::fmt::Display for ContextOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

fn check_entry(key: &str, value: &Value) -> RequestResult<()> {
    let valid = if STRING_LIST_KEYS.contains(&key) {
        value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string))
    } else if key == "graph_measure" {
        value.is_string()
    } else if key == "graph_mode" {
        matches!(value.as_str(), Some("bar" | "line" | "pie"))
    } else if let Some(filter) = key.strip_prefix("search_default_") {
        !filter.is_empty() && (value.is_boolean() || value.is_i64() || value.is_u64())
    } else {
        return Err(RequestError::validation(format!(
            "Unsupported action context key '{key}'"
        )));
    };
    if !valid {
        return Err(RequestError::validation(format!(
            "Invalid value for action context key '{key}': {value}"
        )));
    }
    Ok(())
}

/// Display name of the action; materialized views show their refresh time.
pub fn action_name(name: &str, materialized: bool, now: DateTime<Utc>) -> String {
    if !materialized {
        return name.to_string();
    }
    format!("{name} ({})", now.format("%m/%d/%Y %H:%M:%S UTC"))
}

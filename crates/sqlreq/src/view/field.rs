//! Fields of a SQL view and the markup each one contributes.

use crate::error::{RequestError, RequestResult};
use serde::{Deserialize, Serialize};

/// Columns are exposed only when their name carries this prefix.
pub const RESERVED_PREFIX: &str = "x_";

/// Axis a field takes in graph and pivot views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    Measure,
    Row,
    Col,
}

impl GraphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Row => "row",
            Self::Col => "col",
        }
    }
}

/// Semantic type of a field on the generated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Char,
    Date,
    Datetime,
    Float,
    Integer,
    Many2one,
    Selection,
    Text,
}

impl FieldType {
    /// Map a `format_type` string to a field type.
    ///
    /// Integer columns named `*_id` are relations.
    pub fn from_sql_type(sql_type: &str, name: &str) -> Self {
        let base = sql_type.split('(').next().unwrap_or(sql_type).trim();
        match base {
            "boolean" => Self::Boolean,
            "bigint" | "integer" | "smallint" => {
                if name.ends_with("_id") {
                    Self::Many2one
                } else {
                    Self::Integer
                }
            }
            "double precision" | "real" | "numeric" => Self::Float,
            "text" => Self::Text,
            "date" => Self::Date,
            t if t.starts_with("timestamp") => Self::Datetime,
            _ => Self::Char,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Many2one => "many2one",
            Self::Selection => "selection",
            Self::Text => "text",
        }
    }

    /// Types on which an aggregate operator makes sense.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// How a field shows up in the list view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeVisibility {
    #[default]
    Available,
    Invisible,
    OptionalShow,
    OptionalHide,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperator {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl GroupOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

/// One exposed column of a [`SqlView`](super::SqlView).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewField {
    pub name: String,
    /// Catalog ordinal of the column.
    pub sequence: i32,
    pub sql_type: String,
    pub field_description: String,
    pub ttype: FieldType,
    pub is_index: bool,
    pub is_group_by: bool,
    pub graph_type: Option<GraphType>,
    pub tree_visibility: TreeVisibility,
    /// Target model, required for `many2one` fields.
    pub many2one_model: Option<String>,
    pub group_operator: Option<GroupOperator>,
}

impl ViewField {
    /// A new field for catalog column `name`.
    pub fn new(name: impl Into<String>, sequence: i32, sql_type: impl Into<String>) -> Self {
        let name = name.into();
        let sql_type = sql_type.into();
        let ttype = FieldType::from_sql_type(&sql_type, &name);
        Self {
            field_description: describe(&name),
            graph_type: match ttype {
                FieldType::Integer | FieldType::Float => Some(GraphType::Measure),
                _ => None,
            },
            group_operator: ttype.is_numeric().then_some(GroupOperator::Sum),
            name,
            sequence,
            sql_type,
            ttype,
            is_index: false,
            is_group_by: false,
            tree_visibility: TreeVisibility::Available,
            many2one_model: None,
        }
    }

    /// Fields without a label are left out of the model and every view.
    pub fn is_user_facing(&self) -> bool {
        !self.field_description.is_empty()
    }

    /// Name of the index built on this field, unique per view.
    pub fn index_name(&self, view_name: &str) -> String {
        format!("{view_name}_{}", self.sequence)
    }

    /// Invariants that hold for a single field.
    pub fn check(&self) -> RequestResult<()> {
        if self.group_operator.is_some() && !self.ttype.is_numeric() {
            return Err(RequestError::validation(format!(
                "Group operator is only allowed on integer or float fields ({})",
                self.name
            )));
        }
        if self.many2one_model.is_some() && self.ttype != FieldType::Many2one {
            return Err(RequestError::validation(format!(
                "Only many2one fields can reference a model ({})",
                self.name
            )));
        }
        Ok(())
    }

    pub fn tree_markup(&self) -> String {
        let attr = match self.tree_visibility {
            TreeVisibility::Unavailable => return String::new(),
            TreeVisibility::Available => "",
            TreeVisibility::Invisible => r#" invisible="1""#,
            TreeVisibility::OptionalShow => r#" optional="show""#,
            TreeVisibility::OptionalHide => r#" optional="hide""#,
        };
        format!(r#"<field name="{}"{attr}/>"#, escape_xml(&self.name))
    }

    pub fn graph_markup(&self) -> String {
        match self.graph_type {
            Some(graph_type) => format!(
                r#"<field name="{}" type="{}"/>"#,
                escape_xml(&self.name),
                graph_type.as_str()
            ),
            None => String::new(),
        }
    }

    pub fn pivot_markup(&self) -> String {
        match self.graph_type {
            Some(graph_type) => format!(
                r#"<field name="{}" type="{}"/>"#,
                escape_xml(&self.name),
                graph_type.as_str()
            ),
            None => format!(r#"<field name="{}"/>"#, escape_xml(&self.name)),
        }
    }

    pub fn search_markup(&self) -> String {
        format!(r#"<field name="{}"/>"#, escape_xml(&self.name))
    }

    /// Group-by filter, only for fields flagged `is_group_by`.
    pub fn search_filter_markup(&self) -> String {
        if !self.is_group_by {
            return String::new();
        }
        let name = escape_xml(&self.name);
        format!(
            r#"<filter name="group_by_{name}" string="{}" context="{{'group_by': '{name}'}}"/>"#,
            escape_xml(&self.field_description)
        )
    }
}

/// Label derived from a column name: `x_total_amount` becomes `Total Amount`.
pub fn describe(name: &str) -> String {
    name.strip_prefix(RESERVED_PREFIX)
        .unwrap_or(name)
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

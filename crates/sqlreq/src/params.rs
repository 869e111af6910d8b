//! Named query parameters rendered as SQL literals.
//!
//! Placeholders use the `%(name)s` form. When at least one parameter is given,
//! `%%` renders as a literal `%`; with no parameters the query is left untouched.

use crate::error::{RequestError, RequestResult};
use crate::ident::quote_literal;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// A parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Rendered as a parenthesized tuple, for `IN %(ids)s`.
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Whether the value counts as "filled in" for a required property.
    pub fn is_set(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Text(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("NULL"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            // a leading space keeps `10-%(n)s` from turning into a `--` comment
            Self::Int(i) => {
                if *i < 0 {
                    out.push(' ');
                }
                out.push_str(&i.to_string());
            }
            Self::Float(f) if f.is_finite() => {
                if f.is_sign_negative() {
                    out.push(' ');
                }
                out.push_str(&f.to_string());
            }
            Self::Float(f) => {
                out.push_str(&quote_literal(&f.to_string()));
                out.push_str("::float8");
            }
            Self::Text(s) => out.push_str(&quote_literal(s)),
            Self::Date(d) => {
                out.push_str(&quote_literal(&d.format("%Y-%m-%d").to_string()));
                out.push_str("::date");
            }
            Self::Timestamp(ts) => {
                out.push_str(&quote_literal(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()));
                out.push_str("::timestamp");
            }
            Self::List(items) => {
                out.push('(');
                if items.is_empty() {
                    out.push_str("NULL");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_sql(out);
                }
                out.push(')');
            }
        }
    }

    /// Render the value as a SQL literal.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Named parameters for a request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    values: BTreeMap<String, ParamValue>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Substitute `%(name)s` placeholders in `query`.
    pub fn render(&self, query: &str) -> RequestResult<String> {
        if self.values.is_empty() {
            return Ok(query.to_string());
        }

        let mut out = String::with_capacity(query.len());
        let mut rest = query;
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("%%") {
                out.push('%');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("%(") {
                let end = after.find(")s").ok_or_else(|| {
                    RequestError::validation("Unterminated %(name)s placeholder in query")
                })?;
                let name = &after[..end];
                let value = self.values.get(name).ok_or_else(|| {
                    RequestError::validation(format!("Missing value for query parameter '{name}'"))
                })?;
                value.write_sql(&mut out);
                rest = &after[end + 2..];
            } else {
                return Err(RequestError::validation(format!(
                    "Unsupported placeholder near '{}'",
                    tail.chars().take(8).collect::<String>()
                )));
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

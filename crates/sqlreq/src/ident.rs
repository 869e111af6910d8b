//! Safe SQL identifier and literal handling.
//!
//! Free-text request bodies are inserted verbatim (they were validated beforehand),
//! but every name the engine derives itself goes through this module:
//!
//! - Identifiers are always double-quoted with `"` escaped as `""`
//! - Literals are single-quoted with `'` escaped as `''`
//! - Technical names must follow the unquoted identifier grammar:
//!   `[A-Za-z_][A-Za-z0-9_$]*`
//!
//! # Example
//! ```ignore
//! use sqlreq::ident::{quote_ident, quote_literal};
//!
//! assert_eq!(quote_ident("x_bi_sql_view_sales"), r#""x_bi_sql_view_sales""#);
//! assert_eq!(quote_literal("O'Neil"), "'O''Neil'");
//! ```

use crate::error::{RequestError, RequestResult};

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes.
pub const MAX_IDENT_LEN: usize = 63;

/// Render `name` as a quoted SQL identifier.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Render `value` as a quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Check a technical name used as a view-name suffix.
///
/// `prefix` is prepended before the length check, since the full name is what
/// ends up in the catalog.
pub fn validate_technical_name(name: &str, prefix: &str) -> RequestResult<()> {
    if name.is_empty() {
        return Err(RequestError::validation("Technical name cannot be empty"));
    }
    if name.contains('\0') {
        return Err(RequestError::validation(
            "Technical name cannot contain NUL character",
        ));
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !(first == '_' || first.is_ascii_alphabetic()) {
            return Err(RequestError::validation(format!(
                "Invalid technical name start character: '{first}'"
            )));
        }
    }
    for c in chars {
        if !(c == '_' || c == '$' || c.is_ascii_alphanumeric()) {
            return Err(RequestError::validation(format!(
                "Invalid character in technical name: '{c}'"
            )));
        }
    }

    let full_len = prefix.len() + name.len();
    if full_len > MAX_IDENT_LEN {
        return Err(RequestError::validation(format!(
            "View name '{prefix}{name}' is {full_len} bytes long, PostgreSQL allows {MAX_IDENT_LEN}"
        )));
    }
    Ok(())
}

//! Reconciling stored fields with a fresh column manifest.

use super::field::{RESERVED_PREFIX, ViewField};
use crate::error::{RequestError, RequestResult};
use crate::probe::ColumnInfo;
use std::collections::HashSet;

/// What a synchronization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    /// Fields whose sequence or type actually changed.
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Update `fields` in place so they match `columns`.
///
/// Existing fields keep their settings and only get a new sequence and type.
/// Unknown columns become fields only when they carry [`RESERVED_PREFIX`].
/// Fields whose column vanished are removed. The result is ordered by sequence.
///
/// Fails with [`RequestError::NoColumnFound`] when no field remains; `fields` may
/// have been modified in that case, so callers work on a copy.
pub fn synchronize_fields(
    fields: &mut Vec<ViewField>,
    columns: &[ColumnInfo],
) -> RequestResult<SyncReport> {
    let mut report = SyncReport::default();
    let mut seen = HashSet::with_capacity(columns.len());

    for column in columns {
        let existing = fields.iter().position(|f| f.name == column.name);
        match existing {
            Some(index) => {
                let field = &mut fields[index];
                seen.insert(column.name.as_str());
                if field.sequence != column.position || field.sql_type != column.sql_type {
                    field.sequence = column.position;
                    field.sql_type = column.sql_type.clone();
                    report.updated.push(field.name.clone());
                }
            }
            None if column.name.starts_with(RESERVED_PREFIX) => {
                seen.insert(column.name.as_str());
                fields.push(ViewField::new(
                    column.name.clone(),
                    column.position,
                    column.sql_type.clone(),
                ));
                report.created.push(column.name.clone());
            }
            None => {}
        }
    }

    fields.retain(|f| {
        let keep = seen.contains(f.name.as_str());
        if !keep {
            report.deleted.push(f.name.clone());
        }
        keep
    });
    fields.sort_by_key(|f| f.sequence);

    if fields.is_empty() {
        return Err(RequestError::NoColumnFound);
    }
    Ok(report)
}

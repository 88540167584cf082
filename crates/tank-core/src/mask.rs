//! Field-mask driven partial updates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Record;

/// Path that stands for every mutable field of the record.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskError {
    #[error("field mask path '{path}' does not name a field of {record}")]
    UnknownPath { path: String, record: &'static str },
}

/// Ordered set of field paths naming the authoritative fields of a partial record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::new([WILDCARD])
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Trim, snake-case and deduplicate paths, then fold sub-paths into a
    /// parent that is also present. First occurrence wins the position.
    pub fn normalize(&self) -> Self {
        let mut paths: Vec<String> = Vec::with_capacity(self.paths.len());
        for raw in &self.paths {
            let path = snake_case(raw.trim().trim_matches('.'));
            if path.is_empty() || paths.contains(&path) {
                continue;
            }
            paths.push(path);
        }
        if paths.iter().any(|p| p == WILDCARD) {
            return Self::all();
        }
        let folded = paths
            .iter()
            .filter(|p| !paths.iter().any(|parent| is_sub_path(p, parent)))
            .cloned()
            .collect();
        Self { paths: folded }
    }

    /// Map the normalized paths onto fields of `R`, expanding the wildcard.
    pub fn resolve<R: Record>(&self) -> Result<Vec<&'static str>, MaskError> {
        let mut fields = Vec::new();
        for path in &self.normalize().paths {
            if path == WILDCARD {
                return Ok(R::mutable_fields());
            }
            let column = R::column(path).ok_or_else(|| MaskError::UnknownPath {
                path: path.clone(),
                record: R::NAME,
            })?;
            fields.push(column.name);
        }
        Ok(fields)
    }
}

/// Keep only `fields` of `partial`; everything else takes the default value.
pub fn restrict<R: Record>(partial: &R, fields: &[&str]) -> R {
    let mut restricted = R::default();
    for field in fields {
        restricted.copy_field(partial, field);
    }
    restricted
}

/// Overlay the masked fields of `partial` onto a copy of `current`.
///
/// A masked field holding its default value in `partial` still overwrites.
/// An empty mask merges nothing. The key never changes.
pub fn merge<R: Record>(current: &R, partial: &R, mask: &FieldMask) -> Result<R, MaskError> {
    let fields = mask.resolve::<R>()?;
    if fields.is_empty() {
        return Ok(current.clone());
    }
    let restricted = restrict(partial, &fields);
    let mut merged = current.clone();
    for field in &fields {
        merged.copy_field(&restricted, field);
    }
    Ok(merged)
}

fn is_sub_path(path: &str, parent: &str) -> bool {
    path.len() > parent.len()
        && path.starts_with(parent)
        && path.as_bytes()[parent.len()] == b'.'
}

fn snake_case(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    for ch in path.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() && !out.ends_with('.') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

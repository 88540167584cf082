use std::fmt;

use serde::{Deserialize, Serialize};

use super::QueryError;

/// Limit rendered when the window is unbounded.
pub const UNBOUNDED: i64 = -1;

/// Pagination as callers send it. `limit <= 0` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }
}

/// Result window built from an optional pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    limit: Option<usize>,
    offset: usize,
    clause: bool,
}

impl Window {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_pagination(pagination: Option<&Pagination>) -> Result<Self, QueryError> {
        let Some(p) = pagination else {
            return Ok(Self::unbounded());
        };
        if p.offset < 0 {
            return Err(QueryError::NegativeOffset(p.offset));
        }
        let limit = (p.limit > 0).then(|| usize::try_from(p.limit).unwrap_or(usize::MAX));
        Ok(Self {
            limit,
            offset: usize::try_from(p.offset).unwrap_or(usize::MAX),
            clause: true,
        })
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.clause {
            return Ok(());
        }
        match self.limit {
            Some(limit) => write!(f, "LIMIT {limit} OFFSET {}", self.offset),
            None => write!(f, "LIMIT {UNBOUNDED} OFFSET {}", self.offset),
        }
    }
}

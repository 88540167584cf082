use std::collections::BTreeMap;
use std::fmt;

use super::operator::Operator;
use super::QueryError;
use crate::record::{Record, Value};

/// A filter whose key has been resolved to a column and whose value has the column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: &'static str,
    pub operator: Operator,
    pub value: Value,
}

impl Filter {
    pub fn new(column: &'static str, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            column,
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub column: &'static str,
    pub operator: Operator,
    pub param: String,
}

/// Bound values keyed by parameter name.
pub type Params = BTreeMap<String, Value>;

/// Conjunction of clauses. Values never appear in it, only parameter names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

/// Compile filters into one AND-ed predicate plus its bound values.
///
/// Parameter names carry the filter's position, so two filters on the same
/// column keep separate values.
pub fn build(filters: &[Filter]) -> (Predicate, Params) {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Params::new();
    for (index, filter) in filters.iter().enumerate() {
        let param = format!("p{index}_{}", filter.column);
        params.insert(param.clone(), filter.value.clone());
        clauses.push(Clause {
            column: filter.column,
            operator: filter.operator,
            param,
        });
    }
    (Predicate { clauses }, params)
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches<R: Record>(&self, record: &R, params: &Params) -> Result<bool, QueryError> {
        for clause in &self.clauses {
            let field = record
                .value(clause.column)
                .ok_or_else(|| QueryError::UnknownColumn(clause.column.to_string()))?;
            let bound = params
                .get(&clause.param)
                .ok_or_else(|| QueryError::UnboundParameter(clause.param.clone()))?;
            if !clause.operator.test(&field, bound) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `WHERE ...` or the empty string.
    pub fn where_clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("WHERE {self}")
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            f.write_str(&clause.operator.fragment(clause.column, &clause.param))?;
        }
        Ok(())
    }
}

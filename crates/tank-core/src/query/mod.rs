//! Translation of list criteria into a parameterized query.
//!
//! Filters become a conjunctive [`Predicate`] whose clauses only reference
//! named parameters; the values travel separately in [`Params`]. Pagination
//! becomes a [`Window`]. The in-memory executor evaluates the same structure
//! that [`Query::to_sql`] renders.

pub mod operator;
pub mod predicate;
pub mod window;

use thiserror::Error;

use crate::record::{ColumnType, Record};

pub use operator::{Operator, OperatorCode};
pub use predicate::{Clause, Filter, Params, Predicate};
pub use window::{Pagination, Window};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("offset must not be negative (got {0})")]
    NegativeOffset(i64),
    #[error("filter value for '{key}' is not a valid {expected}")]
    InvalidValue { key: String, expected: ColumnType },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("parameter ':{0}' is not bound")]
    UnboundParameter(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub predicate: Predicate,
    pub params: Params,
    pub window: Window,
}

impl Query {
    pub fn new(filters: &[Filter], window: Window) -> Self {
        let (predicate, params) = predicate::build(filters);
        Self {
            predicate,
            params,
            window,
        }
    }

    /// Every record, no window.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches<R: Record>(&self, record: &R) -> Result<bool, QueryError> {
        self.predicate.matches(record, &self.params)
    }

    /// SQL text of the query, for logs. Contains parameter names, never values.
    pub fn to_sql<R: Record>(&self) -> String {
        let columns = R::COLUMNS
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {}", R::TABLE);
        let where_clause = self.predicate.where_clause();
        if !where_clause.is_empty() {
            sql.push(' ');
            sql.push_str(&where_clause);
        }
        let window = self.window.to_string();
        if !window.is_empty() {
            sql.push(' ');
            sql.push_str(&window);
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    use super::*;
    use crate::system::System;
    use crate::tank::Tank;

    #[test]
    fn renders_select_with_where_and_window() {
        let window = Window::from_pagination(Some(&Pagination::new(0, 3))).unwrap();
        let query = Query::new(
            &[
                Filter::new("size", Operator::Greater, 10),
                Filter::new("system", Operator::Contains, "rack"),
            ],
            window,
        );
        assert_eq!(
            query.to_sql::<Tank>(),
            "SELECT number, system, active, size, fish_count FROM tanks \
             WHERE size > :p0_size AND instr(system, :p1_system) > 0 LIMIT -1 OFFSET 3"
        );
    }

    #[test]
    fn rendered_sql_parses() {
        let dialect = GenericDialect {};
        let queries = [
            Query::all().to_sql::<Tank>(),
            Query::new(
                &[Filter::new("fish_count", Operator::SmallerEq, 4)],
                Window::from_pagination(Some(&Pagination::new(2, 0))).unwrap(),
            )
            .to_sql::<Tank>(),
            Query::new(
                &[
                    Filter::new("location", Operator::Contains, "lab"),
                    Filter::new("cleaning_interval", Operator::GreaterEq, 30),
                ],
                Window::unbounded(),
            )
            .to_sql::<System>(),
        ];
        for sql in queries {
            let ast = Parser::parse_sql(&dialect, &sql)
                .unwrap_or_else(|e| panic!("{sql}: {e}"));
            assert_eq!(ast.len(), 1);
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Value;

/// Closed set of comparisons a filter may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operator {
    #[default]
    Eq,
    Greater,
    GreaterEq,
    Smaller,
    SmallerEq,
    Contains,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::Eq,
        Operator::Greater,
        Operator::GreaterEq,
        Operator::Smaller,
        Operator::SmallerEq,
        Operator::Contains,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operator::Eq => "EQ",
            Operator::Greater => "GREATER",
            Operator::GreaterEq => "GREATER_EQ",
            Operator::Smaller => "SMALLER",
            Operator::SmallerEq => "SMALLER_EQ",
            Operator::Contains => "CONTAINS",
        }
    }

    /// Wire enum number.
    pub fn code(self) -> i64 {
        match self {
            Operator::Eq => 0,
            Operator::Greater => 1,
            Operator::GreaterEq => 2,
            Operator::Smaller => 3,
            Operator::SmallerEq => 4,
            Operator::Contains => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// SQL spelling of the comparison. `Contains` is the substring function.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Greater => ">",
            Operator::GreaterEq => ">=",
            Operator::Smaller => "<",
            Operator::SmallerEq => "<=",
            Operator::Contains => "instr",
        }
    }

    /// Predicate fragment comparing `column` against the named parameter.
    pub fn fragment(self, column: &str, param: &str) -> String {
        match self {
            Operator::Contains => format!("instr({column}, :{param}) > 0"),
            op => format!("{column} {} :{param}", op.symbol()),
        }
    }

    /// Evaluate `field <op> bound`. Values of different types never match.
    pub fn test(self, field: &Value, bound: &Value) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Operator::Contains => field.as_text().contains(bound.as_text().as_ref()),
            Operator::Eq => field.compare(bound) == Some(Equal),
            Operator::Greater => field.compare(bound) == Some(Greater),
            Operator::GreaterEq => matches!(field.compare(bound), Some(Greater | Equal)),
            Operator::Smaller => field.compare(bound) == Some(Less),
            Operator::SmallerEq => matches!(field.compare(bound), Some(Less | Equal)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator as it arrives on the wire: enum number or name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorCode {
    Code(i64),
    Name(String),
}

impl Default for OperatorCode {
    fn default() -> Self {
        OperatorCode::Code(0)
    }
}

impl OperatorCode {
    pub fn resolve(&self) -> Option<Operator> {
        match self {
            OperatorCode::Code(code) => Operator::from_code(*code),
            OperatorCode::Name(name) => Operator::from_name(name),
        }
    }

    /// Resolve, falling back to `Eq` for anything unmapped. The flag reports the fallback.
    pub fn resolve_or_eq(&self) -> (Operator, bool) {
        match self.resolve() {
            Some(op) => (op, false),
            None => (Operator::Eq, true),
        }
    }
}

impl From<Operator> for OperatorCode {
    fn from(op: Operator) -> Self {
        OperatorCode::Name(op.name().to_string())
    }
}

impl fmt::Display for OperatorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorCode::Code(code) => write!(f, "{code}"),
            OperatorCode::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_operator_to_its_fragment() {
        assert_eq!(Operator::Eq.fragment("size", "p0"), "size = :p0");
        assert_eq!(Operator::Greater.fragment("size", "p0"), "size > :p0");
        assert_eq!(Operator::GreaterEq.fragment("size", "p0"), "size >= :p0");
        assert_eq!(Operator::Smaller.fragment("size", "p0"), "size < :p0");
        assert_eq!(Operator::SmallerEq.fragment("size", "p0"), "size <= :p0");
        assert_eq!(
            Operator::Contains.fragment("system", "p0"),
            "instr(system, :p0) > 0"
        );
    }

    #[test]
    fn unknown_codes_fall_back_to_eq() {
        assert_eq!(OperatorCode::Code(42).resolve_or_eq(), (Operator::Eq, true));
        assert_eq!(
            OperatorCode::Name("LIKE".into()).resolve_or_eq(),
            (Operator::Eq, true)
        );
        assert_eq!(
            OperatorCode::Name("greater_eq".into()).resolve_or_eq(),
            (Operator::GreaterEq, false)
        );
        assert_eq!(OperatorCode::Code(5).resolve_or_eq(), (Operator::Contains, false));
    }

    #[test]
    fn contains_is_plain_substring() {
        let field = Value::from("rack-a%");
        assert!(Operator::Contains.test(&field, &Value::from("a%")));
        assert!(!Operator::Contains.test(&field, &Value::from("b_")));
        assert!(Operator::Contains.test(&Value::Int(150), &Value::from("50")));
    }

    #[test]
    fn comparisons_require_matching_types() {
        assert!(Operator::GreaterEq.test(&Value::Int(5), &Value::Int(5)));
        assert!(!Operator::Eq.test(&Value::Int(5), &Value::from("5")));
    }
}

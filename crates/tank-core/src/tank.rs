use serde::{Deserialize, Serialize};

use crate::record::{Column, ColumnType, Record, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tank {
    pub number: u32,
    pub system: String,
    pub active: bool,
    pub size: i32,
    #[serde(alias = "fishCount")]
    pub fish_count: i32,
}

impl Record for Tank {
    type Key = u32;

    const NAME: &'static str = "tank";
    const TABLE: &'static str = "tanks";
    const KEY: &'static str = "number";
    const COLUMNS: &'static [Column] = &[
        Column::new("number", ColumnType::Integer),
        Column::new("system", ColumnType::Text),
        Column::new("active", ColumnType::Bool),
        Column::new("size", ColumnType::Integer),
        Column::new("fish_count", ColumnType::Integer),
    ];
    const FILTER_KEYS: &'static [(&'static str, &'static str)] = &[
        ("number", "number"),
        ("system", "system"),
        ("active", "active"),
        ("size", "size"),
        ("fish_count", "fish_count"),
    ];

    fn key(&self) -> u32 {
        self.number
    }

    fn key_is_unset(key: &u32) -> bool {
        *key == 0
    }

    fn value(&self, column: &str) -> Option<Value> {
        match column {
            "number" => Some(Value::Int(i64::from(self.number))),
            "system" => Some(Value::Text(self.system.clone())),
            "active" => Some(Value::Bool(self.active)),
            "size" => Some(Value::Int(i64::from(self.size))),
            "fish_count" => Some(Value::Int(i64::from(self.fish_count))),
            _ => None,
        }
    }

    fn copy_field(&mut self, other: &Self, field: &str) -> bool {
        match field {
            "system" => self.system.clone_from(&other.system),
            "active" => self.active = other.active,
            "size" => self.size = other.size,
            "fish_count" => self.fish_count = other.fish_count,
            _ => return false,
        }
        true
    }

    fn validate(&self) -> Result<(), String> {
        if self.size < 0 {
            return Err(format!("size must not be negative (got {})", self.size));
        }
        if self.fish_count < 0 {
            return Err(format!(
                "fish_count must not be negative (got {})",
                self.fish_count
            ));
        }
        Ok(())
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::record::{Column, ColumnType, Record, Value};

/// Rack make. Known makes are matched case-insensitively; anything else is kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SystemType {
    #[default]
    Techniplast,
    Custom,
    Other(String),
}

impl SystemType {
    pub fn as_str(&self) -> &str {
        match self {
            SystemType::Techniplast => "techniplast",
            SystemType::Custom => "custom",
            SystemType::Other(name) => name,
        }
    }
}

impl From<String> for SystemType {
    fn from(raw: String) -> Self {
        let name = raw.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("techniplast") {
            SystemType::Techniplast
        } else if name.eq_ignore_ascii_case("custom") {
            SystemType::Custom
        } else {
            SystemType::Other(name.to_string())
        }
    }
}

impl From<SystemType> for String {
    fn from(kind: SystemType) -> Self {
        match kind {
            SystemType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Rack system that tanks are mounted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct System {
    pub name: String,
    pub location: String,
    #[serde(rename = "type")]
    pub kind: SystemType,
    pub responsible: String,
    /// Days between cleanings.
    #[serde(alias = "cleaningInterval")]
    pub cleaning_interval: i32,
    #[serde(alias = "lastCleaned")]
    pub last_cleaned: NaiveDate,
}

impl Record for System {
    type Key = String;

    const NAME: &'static str = "system";
    const TABLE: &'static str = "systems";
    const KEY: &'static str = "name";
    const COLUMNS: &'static [Column] = &[
        Column::new("name", ColumnType::Text),
        Column::new("location", ColumnType::Text),
        Column::new("type", ColumnType::Text),
        Column::new("responsible", ColumnType::Text),
        Column::new("cleaning_interval", ColumnType::Integer),
        Column::new("last_cleaned", ColumnType::Date),
    ];
    // `id` has no column of its own; it names the key.
    const FILTER_KEYS: &'static [(&'static str, &'static str)] = &[
        ("id", "name"),
        ("name", "name"),
        ("location", "location"),
        ("type", "type"),
        ("responsible", "responsible"),
        ("cleaning_interval", "cleaning_interval"),
        ("last_cleaned", "last_cleaned"),
    ];

    fn key(&self) -> String {
        self.name.clone()
    }

    fn key_is_unset(key: &String) -> bool {
        key.trim().is_empty()
    }

    fn value(&self, column: &str) -> Option<Value> {
        match column {
            "name" => Some(Value::Text(self.name.clone())),
            "location" => Some(Value::Text(self.location.clone())),
            "type" => Some(Value::from(self.kind.as_str())),
            "responsible" => Some(Value::Text(self.responsible.clone())),
            "cleaning_interval" => Some(Value::Int(i64::from(self.cleaning_interval))),
            "last_cleaned" => Some(Value::Text(self.last_cleaned.to_string())),
            _ => None,
        }
    }

    fn copy_field(&mut self, other: &Self, field: &str) -> bool {
        match field {
            "location" => self.location.clone_from(&other.location),
            "type" => self.kind.clone_from(&other.kind),
            "responsible" => self.responsible.clone_from(&other.responsible),
            "cleaning_interval" => self.cleaning_interval = other.cleaning_interval,
            "last_cleaned" => self.last_cleaned = other.last_cleaned,
            _ => return false,
        }
        true
    }

    fn validate(&self) -> Result<(), String> {
        if self.cleaning_interval < 0 {
            return Err(format!(
                "cleaning_interval must not be negative (got {})",
                self.cleaning_interval
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_filter_key_targets_name() {
        let column = System::filter_column("id").unwrap();
        assert_eq!(column.name, "name");
        assert!(System::filter_column("number").is_none());
    }

    #[test]
    fn wire_shape_uses_type_and_iso_date() {
        let system: System = serde_json::from_str(
            r#"{"name": "rick", "type": "custom", "last_cleaned": "2024-05-02"}"#,
        )
        .unwrap();
        assert_eq!(system.kind, SystemType::Custom);
        assert_eq!(system.value("last_cleaned"), Some(Value::from("2024-05-02")));
    }

    #[test]
    fn free_text_type_round_trips() {
        let system: System = serde_json::from_str(r#"{"name": "x", "type": "shelf"}"#).unwrap();
        assert_eq!(system.kind, SystemType::Other("shelf".into()));
        assert_eq!(system.value("type"), Some(Value::from("shelf")));

        let json = serde_json::to_value(&system).unwrap();
        assert_eq!(json["type"], "shelf");
        let back: System = serde_json::from_value(json).unwrap();
        assert_eq!(back, system);

        let wal_bytes = bincode::serialize(&system).unwrap();
        assert_eq!(bincode::deserialize::<System>(&wal_bytes).unwrap(), system);
    }

    #[test]
    fn known_types_match_case_insensitively() {
        assert_eq!(SystemType::from("Techniplast".to_string()), SystemType::Techniplast);
        assert_eq!(SystemType::from(" CUSTOM ".to_string()), SystemType::Custom);
        assert_eq!(SystemType::from(String::new()), SystemType::default());
        assert_eq!(String::from(SystemType::Custom), "custom");
    }
}

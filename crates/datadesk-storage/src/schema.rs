//! Typed table schemas inferred from JSON rows, and drift detection between
//! successive inferences for the same table.

use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::Value;

use datadesk_core::Record;

/// Storage class of a materialized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    /// Case-insensitive text. Also holds mixed-type and nested values.
    Text,
}

impl ColumnType {
    /// Column type clause used in `CREATE TABLE`.
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT COLLATE NOCASE",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// False when every value seen was null; the type is then a guess.
    pub observed: bool,
}

/// Ordered column set of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

/// Running type evidence for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evidence {
    Nothing,
    Int,
    Float,
    Bool,
    Text,
}

impl Evidence {
    fn of(value: &Value) -> Evidence {
        match value {
            Value::Null => Evidence::Nothing,
            Value::Bool(_) => Evidence::Bool,
            Value::Number(n) if n.is_i64() => Evidence::Int,
            Value::Number(_) => Evidence::Float,
            _ => Evidence::Text,
        }
    }

    fn merge(self, other: Evidence) -> Evidence {
        use Evidence::*;
        match (self, other) {
            (Nothing, x) | (x, Nothing) => x,
            (Int, Int) => Int,
            (Int, Float) | (Float, Int) | (Float, Float) => Float,
            (Bool, Bool) => Bool,
            _ => Text,
        }
    }

    fn column_type(self) -> ColumnType {
        match self {
            Evidence::Int | Evidence::Bool => ColumnType::Integer,
            Evidence::Float => ColumnType::Real,
            Evidence::Nothing | Evidence::Text => ColumnType::Text,
        }
    }
}

impl TableSchema {
    /// Infer a schema from every row. Columns appear in first-seen order.
    ///
    /// SQLite column names ignore ASCII case, so keys differing only in case
    /// share one column under the first spelling seen.
    pub fn infer(rows: &[Record]) -> Self {
        let mut names: Vec<String> = Vec::new();
        let mut evidence: Vec<Evidence> = Vec::new();

        for row in rows {
            for (key, value) in row {
                let idx = match names.iter().position(|n| n.eq_ignore_ascii_case(key)) {
                    Some(idx) => idx,
                    None => {
                        names.push(key.clone());
                        evidence.push(Evidence::Nothing);
                        names.len() - 1
                    }
                };
                evidence[idx] = evidence[idx].merge(Evidence::of(value));
            }
        }

        let columns = names
            .into_iter()
            .zip(evidence)
            .map(|(name, ev)| ColumnDef {
                name,
                column_type: ev.column_type(),
                observed: ev != Evidence::Nothing,
            })
            .collect();

        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column by name, ignoring ASCII case like SQLite does.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn create_table_sql(&self, table: &str) -> String {
        let defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql()))
            .collect();
        format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
    }

    pub fn insert_sql(&self, table: &str) -> String {
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders.join(", ")
        )
    }

    /// Bind values for one row in column order. Missing keys are NULL.
    ///
    /// Keys match columns ignoring ASCII case; an exact spelling wins, then
    /// the first key in row order.
    pub fn row_values(&self, row: &Record) -> Vec<SqlValue> {
        self.columns
            .iter()
            .map(|c| {
                row.get(&c.name)
                    .or_else(|| {
                        row.iter()
                            .find(|(key, _)| key.eq_ignore_ascii_case(&c.name))
                            .map(|(_, value)| value)
                    })
                    .map(to_sql_value)
                    .unwrap_or(SqlValue::Null)
            })
            .collect()
    }

    /// Changes needed to go from `self` to `newer`.
    ///
    /// Type changes involving a column that was only ever null are not
    /// reported: its type was never really known.
    pub fn diff(&self, newer: &TableSchema) -> Vec<SchemaChange> {
        let mut changes = Vec::new();

        for col in &newer.columns {
            match self.column(&col.name) {
                None => changes.push(SchemaChange::Added {
                    column: col.name.clone(),
                }),
                Some(old)
                    if old.column_type != col.column_type && old.observed && col.observed =>
                {
                    changes.push(SchemaChange::Retyped {
                        column: col.name.clone(),
                        from: old.column_type,
                        to: col.column_type,
                    });
                }
                Some(_) => {}
            }
        }

        for col in &self.columns {
            if newer.column(&col.name).is_none() {
                changes.push(SchemaChange::Removed {
                    column: col.name.clone(),
                });
            }
        }

        changes
    }
}

/// One difference between two schemas of the same table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    Added {
        column: String,
    },
    Removed {
        column: String,
    },
    Retyped {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
}

impl SchemaChange {
    /// True for changes that keep every existing value representable:
    /// an integer column becoming real.
    pub fn is_widening(&self) -> bool {
        matches!(
            self,
            SchemaChange::Retyped {
                from: ColumnType::Integer,
                to: ColumnType::Real,
                ..
            }
        )
    }
}

impl std::fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaChange::Added { column } => write!(f, "+{}", column),
            SchemaChange::Removed { column } => write!(f, "-{}", column),
            SchemaChange::Retyped { column, from, to } => {
                write!(f, "{}: {} -> {}", column, from, to)
            }
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

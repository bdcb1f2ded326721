//! Sample values.

use crate::datatype::DataType;

/// The value of one tag sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// The zero value writers start from before their source has been
    /// read for the first time.
    pub fn zero(data_type: DataType) -> Value {
        match data_type {
            DataType::Boolean => Value::Bool(false),
            DataType::Integer
            | DataType::DoubleInteger
            | DataType::Byte
            | DataType::Word
            | DataType::DoubleWord => Value::Int(0),
            DataType::Float | DataType::Real => Value::Float(0.0),
            DataType::Text(_) => Value::Text(String::new()),
        }
    }

    /// Renders the value as plain text, the form rows are reported in.
    pub fn as_text(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Renders the value as an SQL literal. Text is single-quoted with
    /// embedded quotes doubled; booleans become `1`/`0`.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => "0".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// Converts the value into its JSON representation for IPC payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Coerces a JSON value to the given target type.
    ///
    /// This is the conversion used by the JSON-over-HTTP and IPC device
    /// clients, where the wire representation does not carry the logical
    /// type. Returns `None` when the JSON value cannot represent the type.
    pub fn coerce_json(json: &serde_json::Value, data_type: DataType) -> Option<Value> {
        match data_type {
            DataType::Boolean => json.as_bool().map(Value::Bool),
            DataType::Integer
            | DataType::DoubleInteger
            | DataType::Byte
            | DataType::Word
            | DataType::DoubleWord => json
                .as_i64()
                .or_else(|| json.as_f64().map(|f| f as i64))
                .map(Value::Int),
            DataType::Float | DataType::Real => json.as_f64().map(Value::Float),
            DataType::Text(_) => json.as_str().map(|s| Value::Text(s.to_string())),
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_literals_are_quoted_and_escaped() {
        assert_eq!(Value::Text("plain".into()).to_sql_literal(), "'plain'");
        assert_eq!(Value::Text("it's".into()).to_sql_literal(), "'it''s'");
        assert_eq!(Value::Int(-3).to_sql_literal(), "-3");
        assert_eq!(Value::Bool(true).to_sql_literal(), "1");
        assert_eq!(Value::Bool(false).to_sql_literal(), "0");
    }

    #[test]
    fn json_coercion_follows_the_target_type() {
        assert_eq!(
            Value::coerce_json(&json!(true), DataType::Boolean),
            Some(Value::Bool(true))
        );
        assert_eq!(
            Value::coerce_json(&json!(42), DataType::Integer),
            Some(Value::Int(42))
        );
        // Numeric JSON is truncated toward an integer target.
        assert_eq!(
            Value::coerce_json(&json!(127.2), DataType::Word),
            Some(Value::Int(127))
        );
        assert_eq!(
            Value::coerce_json(&json!(1.5), DataType::Real),
            Some(Value::Float(1.5))
        );
        assert_eq!(
            Value::coerce_json(&json!("hello!"), DataType::Text(None)),
            Some(Value::Text("hello!".into()))
        );
        // Mismatches are refused rather than guessed.
        assert_eq!(Value::coerce_json(&json!("x"), DataType::Integer), None);
        assert_eq!(Value::coerce_json(&json!(1), DataType::Text(None)), None);
    }

    #[test]
    fn zero_values_match_their_type() {
        assert_eq!(Value::zero(DataType::Boolean), Value::Bool(false));
        assert_eq!(Value::zero(DataType::DoubleWord), Value::Int(0));
        assert_eq!(Value::zero(DataType::Real), Value::Float(0.0));
        assert_eq!(Value::zero(DataType::Text(None)), Value::Text(String::new()));
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use std::sync::Arc;

use serde::ser::Serializer;
use serde::Serialize;

/// A literal value carried by a `ResolvedLiteral` node.
///
/// The value alone does not determine the SQL type: a `Null` literal is
/// typed by the node that owns it. Strings are reference counted so that
/// literals synthesized during rewriting can share storage with the
/// output's value arena.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    String(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL text rendering, used in error messages and debug output.
    pub fn sql(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int64(n) => serializer.serialize_i64(*n),
            Value::String(s) => serializer.serialize_str(s.as_ref()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_rendering_quotes_strings() {
        assert_eq!(Value::from("a'b").sql(), "'a\\'b'");
        assert_eq!(Value::Null.sql(), "NULL");
        assert_eq!(Value::from(42i64).sql(), "42");
        assert_eq!(Value::from(true).sql(), "TRUE");
    }
}

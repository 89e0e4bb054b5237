// used for typed parameter values
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// used to keep set-typed values duplicate free and ordered
use std::collections::BTreeSet;
// used to print out readable forms of a data type
use std::fmt;
use std::str::FromStr;

use crate::error::AdHocError;
use crate::subject::SubjectId;

/// The declared value type of a parameter. Collection parameters declare the
/// type of their elements here and the container in [`CollectionKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Subject,
}

impl ParameterType {
    pub fn name(&self) -> &'static str {
        match self {
            ParameterType::Text => "text",
            ParameterType::Integer => "integer",
            ParameterType::Decimal => "decimal",
            ParameterType::Boolean => "boolean",
            ParameterType::Date => "date",
            ParameterType::DateTime => "dateTime",
            ParameterType::Subject => "subject",
        }
    }
}
impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl FromStr for ParameterType {
    type Err = AdHocError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "string" => Ok(ParameterType::Text),
            "integer" => Ok(ParameterType::Integer),
            "decimal" => Ok(ParameterType::Decimal),
            "boolean" => Ok(ParameterType::Boolean),
            "date" => Ok(ParameterType::Date),
            "dateTime" => Ok(ParameterType::DateTime),
            "subject" => Ok(ParameterType::Subject),
            other => Err(AdHocError::Configuration(format!(
                "unknown parameter type '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionKind {
    #[default]
    None,
    List,
    Set,
}

impl CollectionKind {
    pub fn is_collection(&self) -> bool {
        !matches!(self, CollectionKind::None)
    }
    /// Adapts already converted elements into the declared container. Lists
    /// keep input order, sets drop duplicates.
    pub fn collect(&self, elements: Vec<Value>) -> Value {
        match self {
            CollectionKind::Set => Value::Set(elements.into_iter().collect()),
            _ => Value::List(elements),
        }
    }
}

// ------------- Value --------------
/// A typed value, either bound to a parameter or held in an evaluated table cell.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Subject(SubjectId),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    /// Iterates the elements of a collection, or the value itself for a scalar.
    pub fn elements(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(items) => Box::new(items.iter()),
            Value::Set(items) => Box::new(items.iter()),
            Value::Null => Box::new(std::iter::empty()),
            scalar => Box::new(std::iter::once(scalar)),
        }
    }
    pub fn len(&self) -> usize {
        self.elements().count()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Subject(id) => write!(f, "#{id}"),
            Value::List(_) | Value::Set(_) => {
                let parts: Vec<String> = self.elements().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_collection_drops_duplicates_list_keeps_order() {
        let elements = vec![Value::Integer(3), Value::Integer(1), Value::Integer(3)];
        let list = CollectionKind::List.collect(elements.clone());
        assert_eq!(
            list,
            Value::List(vec![Value::Integer(3), Value::Integer(1), Value::Integer(3)])
        );
        let set = CollectionKind::Set.collect(elements);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn parameter_type_names_round_trip() {
        for t in [
            ParameterType::Text,
            ParameterType::Integer,
            ParameterType::Decimal,
            ParameterType::Boolean,
            ParameterType::Date,
            ParameterType::DateTime,
            ParameterType::Subject,
        ] {
            assert_eq!(t.name().parse::<ParameterType>().unwrap(), t);
        }
    }
}

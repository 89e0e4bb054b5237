//! Conversion of untyped (JSON) parameter values into typed [`Value`]s.
//!
//! The [`TypeConverter`] trait is the seam towards whatever conversion service
//! the host provides. [`StandardConverter`] covers primitive scalars, dates and
//! subject references, the latter resolved through a [`ReferenceResolver`].
//! [`coerce_values`] applies a converter to a whole binding map against a list
//! of declared parameters, reifying list- and set-typed parameters.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as Json;
use thiserror::Error;

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::datatype::{ParameterType, Value};
use crate::error::{AdHocError, Result};
use crate::parameter::{ParameterSpec, ParameterValues};
use crate::subject::SubjectId;

pub type JsonMap = serde_json::Map<String, Json>;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {raw} to {target}: {reason}")]
pub struct ConversionError {
    pub raw: String,
    pub target: ParameterType,
    pub reason: String,
}

impl ConversionError {
    pub fn new(raw: &Json, target: ParameterType, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            target,
            reason: reason.into(),
        }
    }
}

/// Converts one raw scalar into the requested type.
pub trait TypeConverter: Send + Sync {
    fn convert(
        &self,
        raw: &Json,
        target: ParameterType,
    ) -> std::result::Result<Value, ConversionError>;
}

/// Resolves "reference by identity" payloads against the subject store.
pub trait ReferenceResolver: Send + Sync {
    fn resolve_uuid(&self, uuid: &str) -> Option<SubjectId>;
    fn resolve_id(&self, id: SubjectId) -> Option<SubjectId>;
}

#[derive(Clone, Copy, Default)]
pub struct StandardConverter<'r> {
    resolver: Option<&'r dyn ReferenceResolver>,
}

impl<'r> StandardConverter<'r> {
    pub fn new() -> Self {
        Self { resolver: None }
    }
    pub fn with_resolver(resolver: &'r dyn ReferenceResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    fn subject(&self, raw: &Json) -> std::result::Result<Value, ConversionError> {
        let target = ParameterType::Subject;
        let resolver = self
            .resolver
            .ok_or_else(|| ConversionError::new(raw, target, "no reference resolver available"))?;
        let resolved = match raw {
            Json::Object(fields) => match (fields.get("uuid"), fields.get("id")) {
                (Some(Json::String(uuid)), _) => resolver.resolve_uuid(uuid),
                (_, Some(id)) => id.as_u64().and_then(|id| resolver.resolve_id(id)),
                _ => return Err(ConversionError::new(raw, target, "expected a uuid or id field")),
            },
            Json::String(uuid) => resolver.resolve_uuid(uuid),
            Json::Number(n) => n.as_u64().and_then(|id| resolver.resolve_id(id)),
            _ => return Err(ConversionError::new(raw, target, "not a reference")),
        };
        resolved
            .map(Value::Subject)
            .ok_or_else(|| ConversionError::new(raw, target, "no such subject"))
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_date_time(s).map(|dt| dt.date()))
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl TypeConverter for StandardConverter<'_> {
    fn convert(
        &self,
        raw: &Json,
        target: ParameterType,
    ) -> std::result::Result<Value, ConversionError> {
        let fail = |reason: &str| ConversionError::new(raw, target, reason);
        match (target, raw) {
            (_, Json::Null) => Ok(Value::Null),
            (ParameterType::Text, Json::String(s)) => Ok(Value::Text(s.clone())),
            (ParameterType::Text, Json::Number(n)) => Ok(Value::Text(n.to_string())),
            (ParameterType::Text, Json::Bool(b)) => Ok(Value::Text(b.to_string())),
            (ParameterType::Integer, Json::Number(n)) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| fail("not an integer")),
            (ParameterType::Integer, Json::String(s)) => s
                .trim()
                .parse()
                .map(Value::Integer)
                .map_err(|_| fail("not an integer")),
            (ParameterType::Decimal, Json::Number(n)) => BigDecimal::from_str(&n.to_string())
                .map(Value::Decimal)
                .map_err(|e| fail(&e.to_string())),
            (ParameterType::Decimal, Json::String(s)) => BigDecimal::from_str(s.trim())
                .map(Value::Decimal)
                .map_err(|e| fail(&e.to_string())),
            (ParameterType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
            (ParameterType::Boolean, Json::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(fail("not a boolean")),
            },
            (ParameterType::Date, Json::String(s)) => parse_date(s.trim())
                .map(Value::Date)
                .ok_or_else(|| fail("expected YYYY-MM-DD")),
            (ParameterType::DateTime, Json::String(s)) => parse_date_time(s.trim())
                .map(Value::DateTime)
                .ok_or_else(|| fail("expected YYYY-MM-DDTHH:MM:SS")),
            (ParameterType::Subject, _) => self.subject(raw),
            _ => Err(fail("incompatible input")),
        }
    }
}

// ------------- Coercion -------------
/// Converts every element of a collection-typed payload individually. A scalar
/// payload is treated as a one-element array. A `null` element is an error:
/// dropping it would change the length and positions of a list.
pub fn convert_elements(
    raw: &Json,
    target: ParameterType,
    converter: &dyn TypeConverter,
) -> std::result::Result<Vec<Value>, ConversionError> {
    let items: Vec<&Json> = match raw {
        Json::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    items
        .into_iter()
        .map(|item| match item {
            Json::Null => Err(ConversionError::new(raw, target, "null element in collection")),
            item => converter.convert(item, target),
        })
        .collect()
}

/// Converts one raw value against its declared parameter. `Null` means
/// "no value" and is never an error here.
pub fn coerce_value(
    spec: &ParameterSpec,
    raw: &Json,
    converter: &dyn TypeConverter,
) -> Result<Value> {
    let converted = if spec.collection.is_collection() {
        if raw.is_null() {
            Ok(Value::Null)
        } else {
            convert_elements(raw, spec.value_type, converter)
                .map(|elements| spec.collection.collect(elements))
        }
    } else {
        converter.convert(raw, spec.value_type)
    };
    converted.map_err(|source| AdHocError::Conversion {
        parameter: spec.name.clone(),
        position: None,
        source,
    })
}

/// Produces a typed binding map from an untyped one.
///
/// Keys that do not name a declared parameter are dropped. Null inputs are left
/// out of the result. `None` in gives `None` out, so "nothing supplied" stays
/// distinguishable from "supplied but empty".
pub fn coerce_values(
    specs: &[ParameterSpec],
    raw: Option<&JsonMap>,
    converter: &dyn TypeConverter,
) -> Result<Option<ParameterValues>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut values = BTreeMap::new();
    for spec in specs {
        if let Some(raw_value) = raw.get(&spec.name) {
            let value = coerce_value(spec, raw_value, converter)?;
            if !value.is_null() {
                values.insert(spec.name.clone(), value);
            }
        }
    }
    Ok(Some(values))
}

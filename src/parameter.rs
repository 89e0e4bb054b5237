//! Declared parameters, their bindings and the defaulting rules applied before
//! a template is instantiated.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use std::collections::BTreeMap;
use std::fmt;

use crate::convert::{TypeConverter, coerce_value};
use crate::datatype::{CollectionKind, ParameterType, Value};
use crate::error::{AdHocError, Result};

lazy_static! {
    static ref PASS_THROUGH: Regex =
        Regex::new(r"^\$\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}$").unwrap();
}

/// Typed values keyed by parameter name.
pub type ParameterValues = BTreeMap<String, Value>;
/// Bindings keyed by parameter name, before they are resolved against a context.
pub type Bindings = BTreeMap<String, Binding>;

// ------------- ParameterSpec -------------
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ParameterType,
    #[serde(default)]
    pub collection: CollectionKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: &str, value_type: ParameterType) -> Self {
        Self {
            name: name.to_owned(),
            value_type,
            collection: CollectionKind::None,
            required: false,
            default_expression: None,
            label: None,
        }
    }
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
    pub fn list(mut self) -> Self {
        self.collection = CollectionKind::List;
        self
    }
    pub fn set(mut self) -> Self {
        self.collection = CollectionKind::Set;
        self
    }
    pub fn labelled(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }
    /// Defaults the parameter to whatever the caller binds under the same name.
    pub fn pass_through(mut self) -> Self {
        self.default_expression = Some(pass_through_expression(&self.name));
        self
    }
    /// Whether two specs describe the same kind of value.
    pub fn compatible_with(&self, other: &ParameterSpec) -> bool {
        self.value_type == other.value_type && self.collection == other.collection
    }
}

impl fmt::Display for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.collection {
            CollectionKind::None => write!(f, "{}: {}", self.name, self.value_type),
            CollectionKind::List => write!(f, "{}: list<{}>", self.name, self.value_type),
            CollectionKind::Set => write!(f, "{}: set<{}>", self.name, self.value_type),
        }
    }
}

/// Anything that declares parameters: templates as well as datasets.
pub trait Parameterizable {
    fn parameters(&self) -> &[ParameterSpec];

    fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters().iter().find(|p| p.name == name)
    }
}

pub fn pass_through_expression(name: &str) -> String {
    format!("${{{name}}}")
}

/// The caller-side parameter name a pass-through expression refers to.
pub fn pass_through_target(expression: &str) -> Option<&str> {
    PASS_THROUGH
        .captures(expression)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

// ------------- Binding -------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Value(Value),
    Expression(String),
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Binding::Value(v) => write!(f, "{v}"),
            Binding::Expression(e) => write!(f, "{e}"),
        }
    }
}

/// Fills every declared parameter that has no explicit value with its own
/// default expression. Parameters declaring no default stay unbound and are
/// dealt with by [`instantiate`].
pub fn map_defaults(specs: &[ParameterSpec], values: ParameterValues) -> Bindings {
    let mut bindings: Bindings = values
        .into_iter()
        .map(|(name, value)| (name, Binding::Value(value)))
        .collect();
    for spec in specs {
        if bindings.contains_key(&spec.name) {
            continue;
        }
        if let Some(default) = &spec.default_expression {
            bindings.insert(spec.name.clone(), Binding::Expression(default.clone()));
        }
    }
    bindings
}

/// Resolves bindings into the values a template is evaluated with.
///
/// `${name}` reads `name` from the caller's values; any other expression is a
/// literal converted to the declared type. A required parameter left without a
/// value is a configuration error.
pub fn instantiate(
    specs: &[ParameterSpec],
    bindings: &Bindings,
    context: &ParameterValues,
    converter: &dyn TypeConverter,
) -> Result<ParameterValues> {
    let mut resolved = ParameterValues::new();
    for spec in specs {
        let value = match bindings.get(&spec.name) {
            Some(Binding::Value(value)) => Some(value.clone()),
            Some(Binding::Expression(expression)) => match pass_through_target(expression) {
                Some(target) => context.get(target).cloned(),
                None => Some(coerce_value(spec, &Json::String(expression.clone()), converter)?),
            },
            None => None,
        };
        match value {
            Some(value) if !value.is_null() => {
                resolved.insert(spec.name.clone(), value);
            }
            _ if spec.required => {
                return Err(AdHocError::Configuration(format!(
                    "required parameter '{}' has no value",
                    spec.name
                )));
            }
            _ => (),
        }
    }
    Ok(resolved)
}

/// Merges template parameters that are left to their pass-through default up
/// into the dataset-level list.
///
/// Declared specs come first and win over merged ones. Specs that share a name
/// but disagree on type or collection kind are rejected instead of overwritten.
pub fn merge_parameters<'a>(
    declared: &[ParameterSpec],
    inherited: impl IntoIterator<Item = &'a ParameterSpec>,
) -> Result<Vec<ParameterSpec>> {
    let mut merged: Vec<ParameterSpec> = declared.to_vec();
    for spec in inherited {
        let Some(target) = spec.default_expression.as_deref().and_then(pass_through_target) else {
            continue;
        };
        let mut lifted = spec.clone();
        lifted.name = target.to_owned();
        lifted.default_expression = None;
        match merged.iter().find(|p| p.name == lifted.name) {
            Some(existing) if !existing.compatible_with(&lifted) => {
                return Err(AdHocError::Configuration(format!(
                    "parameter '{}' is declared both as {} and as {}",
                    lifted.name, existing, lifted
                )));
            }
            Some(_) => (),
            None => merged.push(lifted),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::StandardConverter;
    use chrono::NaiveDate;

    #[test]
    fn pass_through_target_is_extracted() {
        assert_eq!(pass_through_target("${effectiveDate}"), Some("effectiveDate"));
        assert_eq!(pass_through_target("${ startDate }"), Some("startDate"));
        assert_eq!(pass_through_target("2014-01-01"), None);
    }

    #[test]
    fn literal_expression_is_converted() {
        let specs = vec![ParameterSpec::new("onDate", ParameterType::Date).required()];
        let mut bindings = Bindings::new();
        bindings.insert("onDate".into(), Binding::Expression("2014-01-01".into()));
        let converter = StandardConverter::new();
        let values = instantiate(&specs, &bindings, &ParameterValues::new(), &converter)
            .expect("instantiated");
        assert_eq!(
            values.get("onDate"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2014, 1, 1).unwrap()))
        );
    }

    #[test]
    fn optional_parameter_may_stay_unbound() {
        let specs = vec![ParameterSpec::new("maxAge", ParameterType::Integer).pass_through()];
        let bindings = map_defaults(&specs, ParameterValues::new());
        let converter = StandardConverter::new();
        let values = instantiate(&specs, &bindings, &ParameterValues::new(), &converter)
            .expect("instantiated");
        assert!(values.is_empty());
    }
}

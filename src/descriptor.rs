//! The declarative form of an ad-hoc dataset as callers submit it.
//!
//! Parameter values on filters, columns and the dataset itself stay untyped
//! (`serde_json` maps) until evaluation, where they are coerced against the
//! parameters the resolved template declares.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::convert::JsonMap;
use crate::error::{AdHocError, Result};
use crate::library::SubjectDomain;
use crate::parameter::{ParameterSpec, Parameterizable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(pub i64);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFilterDescriptor {
    pub key: String,
    /// The template's kind as reported to the caller; informational only.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_values: Option<JsonMap>,
}

impl RowFilterDescriptor {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            ..Default::default()
        }
    }
    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.parameter_values = values.as_object().cloned();
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_values: Option<JsonMap>,
}

impl ColumnDescriptor {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_owned(),
            name: name.to_owned(),
            ..Default::default()
        }
    }
    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.parameter_values = values.as_object().cloned();
        self
    }
}

/// An ad-hoc dataset: row filters, their composition, and the columns to compute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHocDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DescriptorId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub domain: SubjectDomain,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub row_filters: Vec<RowFilterDescriptor>,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_row_filter_combination: Option<String>,
    /// Evaluation-time values for the dataset parameters. Never persisted.
    #[serde(default, skip_serializing)]
    pub parameter_values: Option<JsonMap>,
}

impl AdHocDataset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AdHocError::Configuration(format!("invalid dataset descriptor: {e}")))
    }
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }
    pub fn with_row_filter(mut self, filter: RowFilterDescriptor) -> Self {
        self.row_filters.push(filter);
        self
    }
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }
    pub fn with_composition(mut self, expression: &str) -> Self {
        self.custom_row_filter_combination = Some(expression.to_owned());
        self
    }
    pub fn with_parameter_values(mut self, values: serde_json::Value) -> Self {
        self.parameter_values = values.as_object().cloned();
        self
    }

    /// The composition to evaluate: the custom one if given, else every
    /// position AND-ed together. `None` when there is nothing to compose.
    pub fn composition(&self) -> Option<String> {
        match &self.custom_row_filter_combination {
            Some(custom) if !custom.trim().is_empty() => Some(custom.clone()),
            _ => default_composition(self.row_filters.len()),
        }
    }
}

impl Parameterizable for AdHocDataset {
    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }
}

/// `"1 AND 2 AND ... AND n"`, or `None` for zero filters.
pub fn default_composition(filter_count: usize) -> Option<String> {
    if filter_count == 0 {
        return None;
    }
    let positions: Vec<String> = (1..=filter_count).map(|p| p.to_string()).collect();
    Some(positions.join(" AND "))
}

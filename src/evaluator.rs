//! Contracts of the evaluators that actually run filters and columns, plus the
//! instantiated forms handed to them.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::datatype::Value;
use crate::error::Result;
use crate::library::{ColumnKind, FilterKind, SubjectDomain};
use crate::parameter::{ParameterSpec, ParameterValues};
use crate::subject::{SubjectId, SubjectSet};

/// Request-scoped state an evaluation runs against.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    /// Dataset-level parameter values, already coerced.
    pub parameter_values: ParameterValues,
    /// When set, every evaluation is restricted to these subjects.
    pub base_population: Option<SubjectSet>,
}

impl EvaluationContext {
    pub fn new(parameter_values: ParameterValues) -> Self {
        Self {
            parameter_values,
            base_population: None,
        }
    }
    pub fn with_base_population(&self, population: SubjectSet) -> Self {
        Self {
            parameter_values: self.parameter_values.clone(),
            base_population: Some(population),
        }
    }
}

/// A row filter template bound to concrete parameter values.
#[derive(Clone, Debug)]
pub struct FilterInstance {
    pub position: usize,
    pub key: String,
    pub kind: FilterKind,
    pub values: ParameterValues,
}

/// A column template bound to concrete parameter values and a display name.
#[derive(Clone, Debug)]
pub struct ColumnInstance {
    pub position: usize,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: ColumnKind,
    pub values: ParameterValues,
}

/// All requested columns, evaluated in one pass over one base population.
#[derive(Clone, Debug, Default)]
pub struct ColumnSetDefinition {
    pub domain: SubjectDomain,
    pub parameters: Vec<ParameterSpec>,
    pub columns: Vec<ColumnInstance>,
}

impl ColumnSetDefinition {
    pub fn add_column(&mut self, column: ColumnInstance) {
        self.columns.push(column);
    }
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

// ------------- Table -------------
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Row {
    pub subject: SubjectId,
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// Values of one column in row order.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|r| r.get(name)).collect()
    }
}

// ------------- Evaluators -------------
pub trait FilterEvaluator: Send + Sync {
    fn evaluate(&self, filter: &FilterInstance, context: &EvaluationContext) -> Result<SubjectSet>;

    /// Combines per-position results according to a composition expression.
    fn evaluate_composite(
        &self,
        results: &BTreeMap<usize, SubjectSet>,
        expression: &str,
        context: &EvaluationContext,
    ) -> Result<SubjectSet>;

    /// The default population used when no row filter is given.
    fn all_subjects(&self, context: &EvaluationContext) -> Result<SubjectSet>;
}

pub trait TabularEvaluator: Send + Sync {
    fn evaluate(
        &self,
        definition: &ColumnSetDefinition,
        context: &EvaluationContext,
    ) -> Result<Table>;
}

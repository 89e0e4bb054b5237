//! The evaluation surface: one call turns a descriptor into a table, a row
//! filter diagnostic, or a capped preview.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use std::collections::BTreeMap;
use std::fmt;

use crate::columns::ColumnEvaluationStage;
use crate::compose::{FilterComposition, FilterCompositionEngine, in_position};
use crate::convert::{JsonMap, TypeConverter, coerce_values};
use crate::descriptor::AdHocDataset;
use crate::error::{AdHocError, Result};
use crate::evaluator::{EvaluationContext, FilterEvaluator, Table, TabularEvaluator};
use crate::library::LibraryRegistry;
use crate::parameter::{ParameterSpec, merge_parameters};
use crate::subject::{PREVIEW_ROW_LIMIT, SubjectSet, cap_population};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationMode {
    #[default]
    Full,
    RowFilterDiagnostic,
    Preview,
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvaluationMode::Full => write!(f, "full"),
            EvaluationMode::RowFilterDiagnostic => write!(f, "row-filters"),
            EvaluationMode::Preview => write!(f, "preview"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum Evaluation {
    /// The table over the full composed population.
    Full { table: Table },
    /// Combined and per-filter results; no table.
    RowFilterDiagnostic {
        all_rows: SubjectSet,
        individual: BTreeMap<usize, SubjectSet>,
    },
    /// The table over a capped population, with the uncapped combined result.
    Preview { table: Table, all_rows: SubjectSet },
}

impl Evaluation {
    pub fn table(&self) -> Option<&Table> {
        match self {
            Evaluation::Full { table } | Evaluation::Preview { table, .. } => Some(table),
            Evaluation::RowFilterDiagnostic { .. } => None,
        }
    }
    pub fn all_rows(&self) -> Option<&SubjectSet> {
        match self {
            Evaluation::Full { .. } => None,
            Evaluation::RowFilterDiagnostic { all_rows, .. }
            | Evaluation::Preview { all_rows, .. } => Some(all_rows),
        }
    }
}

pub struct Engine<'a> {
    registry: &'a dyn LibraryRegistry,
    converter: &'a dyn TypeConverter,
    filters: &'a dyn FilterEvaluator,
    tables: &'a dyn TabularEvaluator,
    preview_row_limit: usize,
}

impl<'a> Engine<'a> {
    pub fn new(
        registry: &'a dyn LibraryRegistry,
        converter: &'a dyn TypeConverter,
        filters: &'a dyn FilterEvaluator,
        tables: &'a dyn TabularEvaluator,
    ) -> Self {
        Self {
            registry,
            converter,
            filters,
            tables,
            preview_row_limit: PREVIEW_ROW_LIMIT,
        }
    }
    pub fn with_preview_row_limit(mut self, limit: usize) -> Self {
        self.preview_row_limit = limit;
        self
    }
    pub fn registry(&self) -> &'a dyn LibraryRegistry {
        self.registry
    }

    /// Dataset-level parameters: the declared ones plus every filter (and, when
    /// asked, column) parameter that defaults to a same-named caller value.
    ///
    /// Fails when the registry has nothing for the dataset's subject domain.
    pub fn dataset_parameters(
        &self,
        dataset: &AdHocDataset,
        with_columns: bool,
    ) -> Result<Vec<ParameterSpec>> {
        if !self.registry.supports(dataset.domain) {
            return Err(AdHocError::Configuration(format!(
                "no row filters or columns are registered for {} subjects",
                dataset.domain
            )));
        }
        let mut inherited = Vec::new();
        for (index, filter) in dataset.row_filters.iter().enumerate() {
            let template = self
                .registry
                .filter(&filter.key)
                .map_err(|e| in_position(e, "row filter", index + 1, &filter.key))?;
            inherited.extend(unbound(&template.parameters, filter.parameter_values.as_ref()));
        }
        if with_columns {
            for (index, column) in dataset.columns.iter().enumerate() {
                let template = self
                    .registry
                    .column(&column.key)
                    .map_err(|e| in_position(e, "column", index + 1, &column.key))?;
                inherited.extend(unbound(&template.parameters, column.parameter_values.as_ref()));
            }
        }
        merge_parameters(&dataset.parameters, inherited)
    }

    /// Coerces the dataset's evaluation-time values into a fresh context.
    pub fn context(
        &self,
        dataset: &AdHocDataset,
        parameters: &[ParameterSpec],
    ) -> Result<EvaluationContext> {
        let values = coerce_values(parameters, dataset.parameter_values.as_ref(), self.converter)?;
        Ok(EvaluationContext::new(values.unwrap_or_default()))
    }

    pub fn compose(
        &self,
        dataset: &AdHocDataset,
        context: &EvaluationContext,
    ) -> Result<FilterComposition> {
        FilterCompositionEngine::new(self.registry, self.converter, self.filters)
            .compose(dataset, context)
    }

    pub fn evaluate(&self, dataset: &AdHocDataset, mode: EvaluationMode) -> Result<Evaluation> {
        let with_columns = mode != EvaluationMode::RowFilterDiagnostic;
        let parameters = self.dataset_parameters(dataset, with_columns)?;
        let context = self.context(dataset, &parameters)?;
        let composition = self.compose(dataset, &context)?;
        let combined = composition.combined;
        info!(dataset = %dataset.name, %mode, rows = combined.len(), "row filters evaluated");

        let columns = ColumnEvaluationStage::new(self.registry, self.converter, self.tables);
        match mode {
            EvaluationMode::RowFilterDiagnostic => Ok(Evaluation::RowFilterDiagnostic {
                all_rows: combined,
                individual: composition.individual,
            }),
            EvaluationMode::Full => {
                let context = context.with_base_population(combined);
                let table = columns.evaluate(dataset, &parameters, &context, false)?;
                Ok(Evaluation::Full { table })
            }
            EvaluationMode::Preview => {
                let capped = cap_population(&combined, self.preview_row_limit);
                debug!(total = combined.len(), shown = capped.len(), "preview population capped");
                let context = context.with_base_population(capped);
                let table = columns.evaluate(dataset, &parameters, &context, true)?;
                Ok(Evaluation::Preview {
                    table,
                    all_rows: combined,
                })
            }
        }
    }
}

/// Template parameters the caller did not bind explicitly.
fn unbound<'t>(
    parameters: &'t [ParameterSpec],
    values: Option<&JsonMap>,
) -> impl Iterator<Item = &'t ParameterSpec> + 't {
    let bound: Vec<String> = values
        .map(|v| {
            v.iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();
    parameters.iter().filter(move |p| !bound.contains(&p.name))
}

//! Expansion of row filter descriptors into one composite filter.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use std::collections::BTreeMap;

use crate::convert::{TypeConverter, coerce_values};
use crate::descriptor::AdHocDataset;
use crate::error::{AdHocError, Result};
use crate::evaluator::{EvaluationContext, FilterEvaluator, FilterInstance};
use crate::library::LibraryRegistry;
use crate::parameter::{instantiate, map_defaults};
use crate::subject::SubjectSet;

lazy_static! {
    static ref POSITION: Regex = Regex::new(r"\d+").unwrap();
}

/// Outcome of evaluating and composing the row filters of one dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FilterComposition {
    /// The expression that was evaluated, `None` when there were no filters.
    pub expression: Option<String>,
    /// Each filter's own result, keyed by 1-based position.
    pub individual: BTreeMap<usize, SubjectSet>,
    pub combined: SubjectSet,
}

pub struct FilterCompositionEngine<'a> {
    registry: &'a dyn LibraryRegistry,
    converter: &'a dyn TypeConverter,
    evaluator: &'a dyn FilterEvaluator,
}

impl<'a> FilterCompositionEngine<'a> {
    pub fn new(
        registry: &'a dyn LibraryRegistry,
        converter: &'a dyn TypeConverter,
        evaluator: &'a dyn FilterEvaluator,
    ) -> Self {
        Self {
            registry,
            converter,
            evaluator,
        }
    }

    /// Resolves, binds and instantiates the filter at `position` (1-based).
    pub fn instantiate(
        &self,
        dataset: &AdHocDataset,
        position: usize,
        context: &EvaluationContext,
    ) -> Result<FilterInstance> {
        let descriptor = dataset
            .row_filters
            .get(position.wrapping_sub(1))
            .ok_or_else(|| AdHocError::NotFound(format!("no row filter at position {position}")))?;
        let in_filter = |e| in_position(e, "row filter", position, &descriptor.key);
        let template = self.registry.filter(&descriptor.key).map_err(in_filter)?;
        template.check_domain(dataset.domain).map_err(in_filter)?;
        let values = coerce_values(
            &template.parameters,
            descriptor.parameter_values.as_ref(),
            self.converter,
        )
        .map_err(in_filter)?
        .unwrap_or_default();
        let bindings = map_defaults(&template.parameters, values);
        let values = instantiate(
            &template.parameters,
            &bindings,
            &context.parameter_values,
            self.converter,
        )
        .map_err(in_filter)?;
        Ok(FilterInstance {
            position,
            key: descriptor.key.clone(),
            kind: template.kind.clone(),
            values,
        })
    }

    /// Evaluates every filter in order, then their composition.
    ///
    /// With no filters the subject domain's all-subjects default is the
    /// combined result; a custom composition without filters is rejected.
    pub fn compose(
        &self,
        dataset: &AdHocDataset,
        context: &EvaluationContext,
    ) -> Result<FilterComposition> {
        let count = dataset.row_filters.len();
        if count == 0 {
            if dataset
                .custom_row_filter_combination
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
            {
                return Err(AdHocError::Configuration(
                    "a row filter combination was given but there are no row filters".into(),
                ));
            }
            let combined = self.evaluator.all_subjects(context)?;
            debug!(rows = combined.len(), "no row filters, using all subjects");
            return Ok(FilterComposition {
                expression: None,
                individual: BTreeMap::new(),
                combined,
            });
        }

        let expression = dataset.composition().unwrap_or_default();
        check_positions(&expression, count)?;

        let mut individual = BTreeMap::new();
        for position in 1..=count {
            let filter = self.instantiate(dataset, position, context)?;
            let target = format!("row filter {position} ({})", filter.key);
            let result = self
                .evaluator
                .evaluate(&filter, context)
                .map_err(|e| wrap_evaluation(e, &target))?;
            debug!(position, key = %filter.key, rows = result.len(), "row filter evaluated");
            individual.insert(position, result);
        }

        let combined = self
            .evaluator
            .evaluate_composite(&individual, &expression, context)
            .map_err(|e| wrap_evaluation(e, &format!("composition '{expression}'")))?;
        debug!(%expression, rows = combined.len(), "row filters composed");
        Ok(FilterComposition {
            expression: Some(expression),
            individual,
            combined,
        })
    }
}

/// Every integer token in a composition must be a position in `1..=count`.
pub fn check_positions(expression: &str, count: usize) -> Result<()> {
    for token in POSITION.find_iter(expression) {
        let valid = token
            .as_str()
            .parse::<usize>()
            .is_ok_and(|p| (1..=count).contains(&p));
        if !valid {
            return Err(AdHocError::Configuration(format!(
                "composition '{expression}' references position {} \
                 but only {count} row filters are defined",
                token.as_str()
            )));
        }
    }
    Ok(())
}

/// Prefixes configuration and lookup errors with the filter or column they
/// arose in; conversion errors get the position attached instead.
pub(crate) fn in_position(
    error: AdHocError,
    stage: &str,
    position: usize,
    key: &str,
) -> AdHocError {
    match error {
        AdHocError::Configuration(message) => {
            AdHocError::Configuration(format!("{stage} {position} ({key}): {message}"))
        }
        AdHocError::NotFound(message) => {
            AdHocError::NotFound(format!("{stage} {position} ({key}): {message}"))
        }
        other => other.at_position(position),
    }
}

/// Names the failing filter or expression on evaluator errors that do not
/// already carry it.
pub(crate) fn wrap_evaluation(error: AdHocError, target: &str) -> AdHocError {
    match error {
        AdHocError::Evaluation {
            target: inner,
            message,
        } if inner != target => AdHocError::Evaluation {
            target: target.to_owned(),
            message: format!("{inner}: {message}"),
        },
        AdHocError::Persistence(message) | AdHocError::Serialization(message) => {
            AdHocError::evaluation(target, message)
        }
        other => other,
    }
}

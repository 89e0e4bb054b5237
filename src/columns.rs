//! Expansion of column descriptors into one column set evaluated in a single pass.

use tracing::debug;

use crate::compose::{in_position, wrap_evaluation};
use crate::convert::{TypeConverter, coerce_values};
use crate::descriptor::AdHocDataset;
use crate::error::Result;
use crate::evaluator::{
    ColumnInstance, ColumnSetDefinition, EvaluationContext, Table, TabularEvaluator,
};
use crate::library::LibraryRegistry;
use crate::parameter::{ParameterSpec, instantiate, map_defaults};

/// `"(2) Family Name"`: previews may show several same-named columns side by side.
pub fn preview_name(position: usize, name: &str) -> String {
    format!("({position}) {name}")
}

pub struct ColumnEvaluationStage<'a> {
    registry: &'a dyn LibraryRegistry,
    converter: &'a dyn TypeConverter,
    evaluator: &'a dyn TabularEvaluator,
}

impl<'a> ColumnEvaluationStage<'a> {
    pub fn new(
        registry: &'a dyn LibraryRegistry,
        converter: &'a dyn TypeConverter,
        evaluator: &'a dyn TabularEvaluator,
    ) -> Self {
        Self {
            registry,
            converter,
            evaluator,
        }
    }

    /// Builds the column set for `dataset` without evaluating it.
    pub fn define(
        &self,
        dataset: &AdHocDataset,
        parameters: &[ParameterSpec],
        context: &EvaluationContext,
        preview: bool,
    ) -> Result<ColumnSetDefinition> {
        let mut definition = ColumnSetDefinition {
            domain: dataset.domain,
            parameters: parameters.to_vec(),
            columns: Vec::with_capacity(dataset.columns.len()),
        };
        for (index, descriptor) in dataset.columns.iter().enumerate() {
            let position = index + 1;
            let in_column = |e| in_position(e, "column", position, &descriptor.key);
            let template = self.registry.column(&descriptor.key).map_err(in_column)?;
            template.check_domain(dataset.domain).map_err(in_column)?;
            let values = coerce_values(
                &template.parameters,
                descriptor.parameter_values.as_ref(),
                self.converter,
            )
            .map_err(in_column)?
            .unwrap_or_default();
            let bindings = map_defaults(&template.parameters, values);
            let values = instantiate(
                &template.parameters,
                &bindings,
                &context.parameter_values,
                self.converter,
            )
            .map_err(in_column)?;
            let name = if preview {
                preview_name(position, &descriptor.name)
            } else {
                descriptor.name.clone()
            };
            definition.add_column(ColumnInstance {
                position,
                key: descriptor.key.clone(),
                name,
                description: descriptor.description.clone(),
                kind: template.kind,
                values,
            });
        }
        Ok(definition)
    }

    /// Evaluates all columns against the context's base population at once.
    pub fn evaluate(
        &self,
        dataset: &AdHocDataset,
        parameters: &[ParameterSpec],
        context: &EvaluationContext,
        preview: bool,
    ) -> Result<Table> {
        let definition = self.define(dataset, parameters, context, preview)?;
        let table = self
            .evaluator
            .evaluate(&definition, context)
            .map_err(|e| wrap_evaluation(e, &format!("columns of '{}'", dataset.name)))?;
        debug!(columns = definition.columns.len(), rows = table.len(), "columns evaluated");
        Ok(table)
    }
}

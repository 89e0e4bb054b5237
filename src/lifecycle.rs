//! Saving, loading and purging ad-hoc descriptors, and cleaning up the
//! disposable definitions built to run them.
//!
//! Durable ad-hoc descriptors are told apart from hand-authored ones by a name
//! prefix. The prefix is added on save, checked before any operation that
//! assumes ad-hoc provenance, and removed again before a descriptor is handed
//! back to a caller.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::descriptor::{AdHocDataset, DescriptorId};
use crate::engine::{Engine, EvaluationMode};
use crate::error::{AdHocError, Result};
use crate::persist::{
    DefinitionId, DescriptorStore, QueryDefinition, RenderingArtifact, RunRequest, RunRequestId,
    RunStatus,
};

/// Marks durable descriptors and run-time definitions as ad-hoc.
pub const AD_HOC_PREFIX: &str = "[AdHoc] ";

/// What one garbage collection sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub scanned: usize,
    pub deleted: usize,
    pub retained: usize,
}

pub struct LifecycleManager<'s> {
    store: &'s dyn DescriptorStore,
    prefix: String,
}

impl<'s> LifecycleManager<'s> {
    pub fn new(store: &'s dyn DescriptorStore) -> Self {
        Self::with_prefix(store, AD_HOC_PREFIX)
    }
    pub fn with_prefix(store: &'s dyn DescriptorStore, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_owned(),
        }
    }
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ------------- naming -------------
    /// Adds the ad-hoc prefix unless the name already has it.
    pub fn tag(&self, name: &str) -> String {
        if self.is_ad_hoc(name) {
            name.to_owned()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }
    pub fn strip<'n>(&self, name: &'n str) -> &'n str {
        name.strip_prefix(self.prefix.as_str()).unwrap_or(name)
    }
    pub fn is_ad_hoc(&self, name: &str) -> bool {
        name.starts_with(self.prefix.as_str())
    }
    pub fn verify_ad_hoc(&self, dataset: &AdHocDataset) -> Result<()> {
        if self.is_ad_hoc(&dataset.name) {
            Ok(())
        } else {
            Err(AdHocError::Lifecycle(format!(
                "'{}' is not an ad-hoc dataset",
                dataset.name
            )))
        }
    }

    fn displayed(&self, mut dataset: AdHocDataset) -> AdHocDataset {
        dataset.name = self.strip(&dataset.name).to_owned();
        dataset
    }

    // ------------- descriptors -------------
    /// Persists a descriptor under a tagged name and returns it as callers see it.
    /// Saving over an existing identity requires that row to be ad-hoc already.
    pub fn save(&self, dataset: &AdHocDataset) -> Result<AdHocDataset> {
        if let Some(id) = dataset.id {
            self.load_tagged(id)?;
        }
        let mut stored = dataset.clone();
        stored.name = self.tag(&dataset.name);
        stored.parameter_values = None;
        let id = self.store.save_descriptor(&stored)?;
        stored.id = Some(id);
        info!(%id, name = %stored.name, "ad-hoc dataset saved");
        Ok(self.displayed(stored))
    }

    fn load_tagged(&self, id: DescriptorId) -> Result<AdHocDataset> {
        let stored = self
            .store
            .load_descriptor(id)?
            .ok_or_else(|| AdHocError::NotFound(format!("descriptor {id}")))?;
        self.verify_ad_hoc(&stored)?;
        Ok(stored)
    }

    pub fn load(&self, id: DescriptorId) -> Result<AdHocDataset> {
        Ok(self.displayed(self.load_tagged(id)?))
    }

    /// Replaces the parameters, row filters and columns of a saved descriptor
    /// with the incoming ones, writing the result back in one save.
    pub fn update(&self, id: DescriptorId, incoming: &AdHocDataset) -> Result<AdHocDataset> {
        let existing = self.load_tagged(id)?;
        let replacement = AdHocDataset {
            id: Some(id),
            name: self.tag(if incoming.name.is_empty() {
                &existing.name
            } else {
                &incoming.name
            }),
            description: incoming.description.clone().or(existing.description),
            domain: incoming.domain,
            parameters: incoming.parameters.clone(),
            row_filters: incoming.row_filters.clone(),
            columns: incoming.columns.clone(),
            custom_row_filter_combination: incoming.custom_row_filter_combination.clone(),
            parameter_values: None,
        };
        self.store.save_descriptor(&replacement)?;
        debug!(%id, "ad-hoc dataset replaced");
        Ok(self.displayed(replacement))
    }

    pub fn purge(&self, id: DescriptorId) -> Result<()> {
        self.load_tagged(id)?;
        self.store.delete_descriptor(id)?;
        info!(%id, "ad-hoc dataset purged");
        Ok(())
    }

    // ------------- run requests -------------
    /// Expands a descriptor into a disposable run definition and queues a
    /// request against it.
    pub fn queue_run(
        &self,
        engine: &Engine,
        dataset: &AdHocDataset,
        mode: EvaluationMode,
    ) -> Result<RunRequest> {
        let with_columns = mode != EvaluationMode::RowFilterDiagnostic;
        let parameters = engine.dataset_parameters(dataset, with_columns)?;
        let mut expanded = dataset.clone();
        expanded.parameters = parameters;
        expanded.id = None;
        let requested_at = Utc::now().to_rfc3339();
        let definition = QueryDefinition {
            id: None,
            name: self.tag(&format!("{} run {}", self.strip(&dataset.name), requested_at)),
            body: json!({
                "mode": mode,
                "source": dataset.id,
                "dataset": expanded,
                "parameterValues": dataset.parameter_values,
            }),
        };
        let definition = self.store.save_definition(&definition)?;
        let mut request = RunRequest {
            id: None,
            definition,
            status: RunStatus::Pending,
            requested_at,
        };
        request.id = Some(self.store.save_run_request(&request)?);
        debug!(%definition, "run queued");
        Ok(request)
    }

    /// Rebuilds the dataset a run was queued for, evaluation values included.
    pub fn run_dataset(&self, definition: DefinitionId) -> Result<(AdHocDataset, EvaluationMode)> {
        let stored = self
            .store
            .load_definition(definition)?
            .ok_or_else(|| AdHocError::NotFound(format!("definition {definition}")))?;
        let mut dataset: AdHocDataset = serde_json::from_value(stored.body["dataset"].clone())?;
        dataset.parameter_values = stored.body["parameterValues"].as_object().cloned();
        let mode: EvaluationMode = serde_json::from_value(stored.body["mode"].clone())?;
        Ok((dataset, mode))
    }

    pub fn complete_run(&self, id: RunRequestId) -> Result<()> {
        self.set_status(id, RunStatus::Completed)
    }
    pub fn fail_run(&self, id: RunRequestId) -> Result<()> {
        self.set_status(id, RunStatus::Failed)
    }
    fn set_status(&self, id: RunRequestId, status: RunStatus) -> Result<()> {
        if self.store.set_run_status(id, status)? {
            Ok(())
        } else {
            Err(AdHocError::NotFound(format!("run request {id}")))
        }
    }
    pub fn remove_run_request(&self, id: RunRequestId) -> Result<()> {
        if self.store.delete_run_request(id)? {
            Ok(())
        } else {
            Err(AdHocError::NotFound(format!("run request {id}")))
        }
    }

    pub fn attach_rendering(
        &self,
        definition: DefinitionId,
        label: &str,
        payload: &str,
    ) -> Result<i64> {
        self.store.save_rendering_artifact(&RenderingArtifact {
            id: None,
            definition,
            label: label.to_owned(),
            payload: payload.to_owned(),
        })
    }

    // ------------- garbage collection -------------
    /// Deletes every disposable definition no run request refers to, together
    /// with its rendering artifacts. Safe to repeat and to run alongside new
    /// submissions: the reference check and the delete happen in one store call.
    pub fn garbage_collect(&self) -> Result<GcReport> {
        let mut report = GcReport::default();
        for definition in self.store.definitions_named(&self.prefix)? {
            report.scanned += 1;
            match self.store.delete_definition_if_unreferenced(definition) {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.retained += 1,
                Err(e) => {
                    warn!(%definition, error = %e, "could not collect definition");
                    return Err(e);
                }
            }
        }
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            retained = report.retained,
            "transient definitions collected"
        );
        Ok(report)
    }
}

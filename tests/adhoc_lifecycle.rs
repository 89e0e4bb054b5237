use serde_json::json;

use adhoc_dataset::AdHocError;
use adhoc_dataset::convert::StandardConverter;
use adhoc_dataset::descriptor::{AdHocDataset, ColumnDescriptor, RowFilterDescriptor};
use adhoc_dataset::engine::{Engine, EvaluationMode};
use adhoc_dataset::library::{Gender, Library};
use adhoc_dataset::lifecycle::{AD_HOC_PREFIX, GcReport, LifecycleManager};
use adhoc_dataset::persist::{
    DescriptorStore, PersistenceMode, Persistor, QueryDefinition, RunStatus,
};
use adhoc_dataset::population::{Population, Subject};

fn setup() -> Persistor {
    Persistor::new(PersistenceMode::InMemory).expect("persistor")
}

fn sample() -> AdHocDataset {
    AdHocDataset::new("Boys")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(
            RowFilterDescriptor::new("bornBetween").with_values(json!({"startDate": "2000-01-01"})),
        )
        .with_column(ColumnDescriptor::new("givenName", "Given Name"))
}

#[test]
fn tagging_is_idempotent_and_stripped_for_display() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let tagged = lifecycle.tag("Boys");
    assert_eq!(tagged, format!("{AD_HOC_PREFIX}Boys"));
    assert_eq!(lifecycle.tag(&tagged), tagged);
    assert_eq!(lifecycle.strip(&tagged), "Boys");
    assert_eq!(lifecycle.strip("Boys"), "Boys");
}

#[test]
fn saved_dataset_is_stored_tagged_and_loaded_untagged() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let saved = lifecycle.save(&sample()).expect("saved");
    let id = saved.id.expect("id");
    assert_eq!(saved.name, "Boys");

    let stored = persistor.load_descriptor(id).expect("load").expect("present");
    assert_eq!(stored.name, format!("{AD_HOC_PREFIX}Boys"));
    lifecycle.verify_ad_hoc(&stored).expect("ad-hoc");

    let loaded = lifecycle.load(id).expect("loaded");
    assert_eq!(loaded.name, "Boys");
    assert_eq!(loaded.row_filters, sample().row_filters);
}

#[test]
fn hand_authored_descriptors_are_refused() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let id = persistor
        .save_descriptor(&AdHocDataset::new("Quarterly report"))
        .expect("saved");
    assert!(matches!(lifecycle.load(id), Err(AdHocError::Lifecycle(_))));
    assert!(matches!(lifecycle.purge(id), Err(AdHocError::Lifecycle(_))));
    assert!(persistor.load_descriptor(id).expect("load").is_some());
}

#[test]
fn saving_over_a_hand_authored_descriptor_is_refused() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let id = persistor
        .save_descriptor(&AdHocDataset::new("Quarterly report"))
        .expect("saved");
    let mut replacement = sample();
    replacement.id = Some(id);
    assert!(matches!(
        lifecycle.save(&replacement),
        Err(AdHocError::Lifecycle(_))
    ));
    let stored = persistor.load_descriptor(id).expect("load").expect("present");
    assert_eq!(stored.name, "Quarterly report");
    assert!(stored.row_filters.is_empty());
}

#[test]
fn saving_with_an_ad_hoc_identity_overwrites_it() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let mut saved = lifecycle.save(&sample()).expect("saved");
    saved.row_filters.truncate(1);
    let resaved = lifecycle.save(&saved).expect("resaved");
    assert_eq!(resaved.id, saved.id);
    let loaded = lifecycle.load(saved.id.expect("id")).expect("loaded");
    assert_eq!(loaded.row_filters.len(), 1);
}

#[test]
fn update_replaces_filters_and_columns() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let id = lifecycle.save(&sample()).expect("saved").id.expect("id");

    let incoming = AdHocDataset::new("")
        .with_row_filter(RowFilterDescriptor::new("females"))
        .with_column(ColumnDescriptor::new("familyName", "Family Name"))
        .with_column(ColumnDescriptor::new("birthdate", "Born"));
    let updated = lifecycle.update(id, &incoming).expect("updated");
    assert_eq!(updated.id, Some(id));
    assert_eq!(updated.name, "Boys");

    let loaded = lifecycle.load(id).expect("loaded");
    assert_eq!(loaded.row_filters, vec![RowFilterDescriptor::new("females")]);
    assert_eq!(loaded.columns.len(), 2);
    assert_eq!(loaded.columns[0].key, "familyName");
}

#[test]
fn purge_removes_the_descriptor() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let id = lifecycle.save(&sample()).expect("saved").id.expect("id");
    lifecycle.purge(id).expect("purged");
    assert!(matches!(lifecycle.load(id), Err(AdHocError::NotFound(_))));
}

#[test]
fn garbage_collection_spares_referenced_definitions() {
    let persistor = setup();
    let lifecycle = LifecycleManager::new(&persistor);
    let population = Population::from_subjects(vec![Subject {
        id: 1,
        uuid: "u1".into(),
        given_name: Some("Ann".into()),
        family_name: None,
        gender: Gender::Female,
        birthdate: None,
    }]);
    let library = Library::standard();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);

    let hand_made = persistor
        .save_definition(&QueryDefinition {
            id: None,
            name: "Monthly extract".into(),
            body: json!({}),
        })
        .expect("definition");

    let request = lifecycle
        .queue_run(&engine, &sample(), EvaluationMode::Preview)
        .expect("queued");
    assert_eq!(request.status, RunStatus::Pending);
    let definition = request.definition;
    lifecycle
        .attach_rendering(definition, "csv", "given name\nAnn\n")
        .expect("rendering");

    let (dataset, mode) = lifecycle.run_dataset(definition).expect("run dataset");
    assert_eq!(mode, EvaluationMode::Preview);
    assert_eq!(dataset.row_filters, sample().row_filters);

    let report = lifecycle.garbage_collect().expect("gc");
    assert_eq!(
        report,
        GcReport {
            scanned: 1,
            deleted: 0,
            retained: 1
        }
    );
    assert!(persistor.load_definition(definition).expect("load").is_some());

    lifecycle
        .complete_run(request.id.expect("request id"))
        .expect("completed");
    lifecycle
        .remove_run_request(request.id.expect("request id"))
        .expect("removed");
    let report = lifecycle.garbage_collect().expect("gc");
    assert_eq!(report.deleted, 1);
    assert!(persistor.load_definition(definition).expect("load").is_none());
    assert!(persistor.rendering_artifacts(definition).expect("artifacts").is_empty());
    assert!(persistor.load_definition(hand_made).expect("load").is_some());

    let report = lifecycle.garbage_collect().expect("gc");
    assert_eq!(report, GcReport::default());
}

#[test]
fn file_mode_keeps_saved_datasets() {
    let path = "test_adhoc_lifecycle_temp.db".to_string();
    let _ = std::fs::remove_file(&path);
    let id = {
        let persistor = Persistor::new(PersistenceMode::File(path.clone())).expect("persistor");
        LifecycleManager::new(&persistor)
            .save(&sample())
            .expect("saved")
            .id
            .expect("id")
    };
    let persistor = Persistor::new(PersistenceMode::File(path.clone())).expect("persistor");
    let loaded = LifecycleManager::new(&persistor).load(id).expect("loaded");
    assert_eq!(loaded.name, "Boys");
    drop(persistor);
    let _ = std::fs::remove_file(&path);
}

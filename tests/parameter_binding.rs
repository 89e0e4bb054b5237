use chrono::NaiveDate;
use serde_json::json;

use adhoc_dataset::AdHocError;
use adhoc_dataset::convert::{JsonMap, StandardConverter, coerce_value, coerce_values};
use adhoc_dataset::datatype::{ParameterType, Value};
use adhoc_dataset::descriptor::{AdHocDataset, ColumnDescriptor, RowFilterDescriptor};
use adhoc_dataset::engine::{Engine, EvaluationMode};
use adhoc_dataset::library::{Gender, Library, LibraryRegistry};
use adhoc_dataset::parameter::{
    Binding, ParameterSpec, ParameterValues, map_defaults, pass_through_expression,
};
use adhoc_dataset::population::{Population, Subject};

fn setup() -> (Population, Library) {
    let subjects = (1..=6u64).map(|i| Subject {
        id: i,
        uuid: format!("uuid-{i}"),
        given_name: None,
        family_name: None,
        gender: if i % 2 == 1 { Gender::Male } else { Gender::Female },
        birthdate: NaiveDate::from_ymd_opt(1995 + i as i32, 1, 1),
    });
    (Population::from_subjects(subjects), Library::standard())
}

fn map(value: serde_json::Value) -> JsonMap {
    value.as_object().cloned().expect("object")
}

#[test]
fn unbound_template_parameters_default_to_pass_through() {
    let (_, library) = setup();
    let template = library.filter("atLeastAgeOnDate").expect("template");
    let bindings = map_defaults(&template.parameters, ParameterValues::new());
    assert_eq!(
        bindings.get("minAge"),
        Some(&Binding::Expression(pass_through_expression("minAge")))
    );
    assert_eq!(
        bindings.get("minAge"),
        Some(&Binding::Expression("${minAge}".to_string()))
    );
    assert_eq!(
        bindings.get("effectiveDate"),
        Some(&Binding::Expression("${effectiveDate}".to_string()))
    );
}

#[test]
fn explicit_values_are_not_replaced_by_defaults() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let template = library.filter("atLeastAgeOnDate").expect("template");
    let raw = map(json!({"minAge": "15"}));
    let values = coerce_values(&template.parameters, Some(&raw), &converter)
        .expect("coerced")
        .expect("supplied");
    let bindings = map_defaults(&template.parameters, values);
    assert_eq!(bindings.get("minAge"), Some(&Binding::Value(Value::Integer(15))));
    assert!(matches!(bindings.get("effectiveDate"), Some(Binding::Expression(_))));
}

#[test]
fn subject_set_is_coerced_element_by_element() {
    let (population, _) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let spec = ParameterSpec::new("subjects", ParameterType::Subject).set();
    let raw = json!([{"uuid": "uuid-3"}, {"id": 1}, 2]);
    let value = coerce_value(&spec, &raw, &converter).expect("coerced");
    match &value {
        Value::Set(members) => assert_eq!(members.len(), 3),
        other => panic!("expected a set, got {other:?}"),
    }
    let direct = Value::Set([3, 1, 2].into_iter().map(Value::Subject).collect());
    assert_eq!(value, direct);
}

#[test]
fn subject_list_keeps_input_order() {
    let (population, _) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let spec = ParameterSpec::new("subjects", ParameterType::Subject).list();
    let value = coerce_value(&spec, &json!([3, 1, 2]), &converter).expect("coerced");
    assert_eq!(
        value,
        Value::List(vec![Value::Subject(3), Value::Subject(1), Value::Subject(2)])
    );
}

#[test]
fn null_collection_element_is_a_conversion_error() {
    let (population, _) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let spec = ParameterSpec::new("subjects", ParameterType::Subject).list();
    let err = coerce_value(&spec, &json!([1, null, 2]), &converter).unwrap_err();
    match err {
        AdHocError::Conversion { parameter, .. } => assert_eq!(parameter, "subjects"),
        other => panic!("expected a conversion error, got {other}"),
    }
    assert_eq!(coerce_value(&spec, &json!(null), &converter).expect("coerced"), Value::Null);
}

#[test]
fn unknown_keys_are_ignored_and_absent_values_stay_absent() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let template = library.filter("ageRangeOnDate").expect("template");
    let values = coerce_values(
        &template.parameters,
        Some(&map(json!({"minAge": 3, "colour": "blue", "maxAge": null}))),
        &converter,
    )
    .expect("coerced")
    .expect("supplied");
    assert_eq!(values.len(), 1);
    assert_eq!(values.get("minAge"), Some(&Value::Integer(3)));
    assert_eq!(coerce_values(&template.parameters, None, &converter).expect("coerced"), None);
}

#[test]
fn conversion_failure_names_parameter_and_position() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("bad age")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(
            RowFilterDescriptor::new("atLeastAgeOnDate")
                .with_values(json!({"minAge": "old", "effectiveDate": "2014-01-01"})),
        );
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    match &err {
        AdHocError::Conversion { parameter, position, .. } => {
            assert_eq!(parameter, "minAge");
            assert_eq!(*position, Some(2));
        }
        other => panic!("expected a conversion error, got {other}"),
    }
    assert!(err.to_string().contains("position 2"));
}

#[test]
fn dataset_values_flow_into_pass_through_parameters() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("grown ups")
        .with_row_filter(
            RowFilterDescriptor::new("atLeastAgeOnDate").with_values(json!({"minAge": 18})),
        )
        .with_column(ColumnDescriptor::new("ageOnDate", "Age"))
        .with_parameter_values(json!({"effectiveDate": "2020-06-01"}));

    let parameters = engine.dataset_parameters(&dataset, true).expect("parameters");
    let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["effectiveDate"]);

    let evaluation = engine.evaluate(&dataset, EvaluationMode::Full).expect("evaluation");
    let table = evaluation.table().expect("table");
    // born 1996..=2001, eighteen by 2020-06-01 means born 2002 or earlier
    assert_eq!(table.len(), 6);
    assert_eq!(table.rows[0].get("Age"), Some(&Value::Integer(24)));
}

#[test]
fn missing_required_value_is_a_configuration_error() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("no date")
        .with_row_filter(
            RowFilterDescriptor::new("atLeastAgeOnDate").with_values(json!({"minAge": 18})),
        );
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("effectiveDate"));
}

#[test]
fn conflicting_parameter_declarations_are_rejected() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("conflict")
        .with_parameter(ParameterSpec::new("effectiveDate", ParameterType::Text))
        .with_row_filter(
            RowFilterDescriptor::new("atLeastAgeOnDate").with_values(json!({"minAge": 18})),
        );
    let err = engine.dataset_parameters(&dataset, false).unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
}

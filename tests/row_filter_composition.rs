use chrono::NaiveDate;
use serde_json::json;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use adhoc_dataset::convert::StandardConverter;
use adhoc_dataset::descriptor::{AdHocDataset, RowFilterDescriptor};
use adhoc_dataset::engine::{Engine, Evaluation, EvaluationMode};
use adhoc_dataset::evaluator::{EvaluationContext, FilterEvaluator, FilterInstance};
use adhoc_dataset::library::{Gender, Library, SubjectDomain};
use adhoc_dataset::population::{Population, Subject};
use adhoc_dataset::subject::SubjectSet;
use adhoc_dataset::{AdHocError, Result};

// Twenty subjects: odd ids male, even ids female, subject i born 1985+i-06-15.
fn setup() -> (Population, Library) {
    let subjects = (1..=20u64).map(|i| Subject {
        id: i,
        uuid: format!("uuid-{i}"),
        given_name: Some(format!("Given{i}")),
        family_name: Some(format!("Family{i}")),
        gender: if i % 2 == 1 { Gender::Male } else { Gender::Female },
        birthdate: NaiveDate::from_ymd_opt(1985 + i as i32, 6, 15),
    });
    (Population::from_subjects(subjects), Library::standard())
}

fn diagnose(
    population: &Population,
    library: &Library,
    dataset: &AdHocDataset,
) -> (SubjectSet, Vec<SubjectSet>) {
    let converter = StandardConverter::with_resolver(population);
    let engine = Engine::new(library, &converter, population, population);
    match engine
        .evaluate(dataset, EvaluationMode::RowFilterDiagnostic)
        .expect("evaluation")
    {
        Evaluation::RowFilterDiagnostic {
            all_rows,
            individual,
        } => (all_rows, individual.into_values().collect()),
        other => panic!("unexpected evaluation {other:?}"),
    }
}

#[test]
fn males_of_at_least_fifteen_on_date() {
    let (population, library) = setup();
    let dataset = AdHocDataset::new("teen boys")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(
            RowFilterDescriptor::new("atLeastAgeOnDate")
                .with_values(json!({"minAge": 15, "effectiveDate": "2014-01-01"})),
        );
    let (combined, individual) = diagnose(&population, &library, &dataset);
    assert_eq!(individual.len(), 2);
    assert_eq!(individual[0].len(), 10);
    // born 1986..=1998 are at least fifteen on 2014-01-01
    assert_eq!(individual[1], (1..=13).collect::<SubjectSet>());
    assert_eq!(combined, individual[0].intersection(&individual[1]));
    assert_eq!(combined.iter().collect::<Vec<_>>(), vec![1, 3, 5, 7, 9, 11, 13]);
}

#[test]
fn default_composition_ands_all_positions() {
    let (population, library) = setup();
    let dataset = AdHocDataset::new("three")
        .with_row_filter(RowFilterDescriptor::new("females"))
        .with_row_filter(
            RowFilterDescriptor::new("bornBetween").with_values(json!({"startDate": "1990-01-01"})),
        )
        .with_row_filter(
            RowFilterDescriptor::new("bornBetween").with_values(json!({"endDate": "1995-12-31"})),
        );
    assert_eq!(dataset.composition().as_deref(), Some("1 AND 2 AND 3"));
    let (combined, individual) = diagnose(&population, &library, &dataset);
    let expected = individual[0].intersection(&individual[1]).intersection(&individual[2]);
    assert_eq!(combined, expected);
    assert_eq!(combined.iter().collect::<Vec<_>>(), vec![6, 8, 10]);
}

#[test]
fn custom_composition_with_or_and_not() {
    let (population, library) = setup();
    let dataset = AdHocDataset::new("custom")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(
            RowFilterDescriptor::new("subjectsIn").with_values(json!({"subjects": [2, 4]})),
        )
        .with_row_filter(
            RowFilterDescriptor::new("bornBetween").with_values(json!({"endDate": "1990-12-31"})),
        )
        .with_composition("(1 or 2) and not 3");
    let (combined, _) = diagnose(&population, &library, &dataset);
    assert_eq!(combined.iter().collect::<Vec<_>>(), vec![7, 9, 11, 13, 15, 17, 19]);
}

#[test]
fn no_filters_yields_every_subject() {
    let (population, library) = setup();
    let dataset = AdHocDataset::new("everyone");
    let (combined, individual) = diagnose(&population, &library, &dataset);
    assert!(individual.is_empty());
    assert_eq!(combined.len(), 20);
}

#[test]
fn custom_composition_without_filters_is_rejected() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("nothing").with_composition("1 AND 2");
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
}

#[test]
fn composition_position_out_of_range_is_rejected() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("bad")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(RowFilterDescriptor::new("females"))
        .with_composition("1 OR 3");
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
    assert!(err.to_string().contains('3'));
}

#[test]
fn unknown_filter_key_is_not_found() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset = AdHocDataset::new("typo").with_row_filter(RowFilterDescriptor::new("mails"));
    let err = engine.evaluate(&dataset, EvaluationMode::Full).unwrap_err();
    assert!(matches!(err, AdHocError::NotFound(_)), "{err}");
}

#[test]
fn column_key_used_as_filter_is_a_configuration_error() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let dataset =
        AdHocDataset::new("wrong kind").with_row_filter(RowFilterDescriptor::new("givenName"));
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
}

#[test]
fn unsupported_subject_domain_is_rejected() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let engine = Engine::new(&library, &converter, &population, &population);
    let mut dataset = AdHocDataset::new("visits");
    dataset.domain = SubjectDomain::Visit;
    let err = engine
        .evaluate(&dataset, EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    assert!(matches!(err, AdHocError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("visit"));
}

// Fails every filter with `failing_key` and, when asked, the composite step.
struct FlakyStore<'p> {
    population: &'p Population,
    failing_key: &'static str,
    composite_fails: bool,
    calls: AtomicUsize,
}

impl<'p> FlakyStore<'p> {
    fn new(population: &'p Population, failing_key: &'static str, composite_fails: bool) -> Self {
        Self {
            population,
            failing_key,
            composite_fails,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FilterEvaluator for FlakyStore<'_> {
    fn evaluate(&self, filter: &FilterInstance, context: &EvaluationContext) -> Result<SubjectSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if filter.key == self.failing_key {
            return Err(AdHocError::evaluation(filter.key.clone(), "store offline"));
        }
        FilterEvaluator::evaluate(self.population, filter, context)
    }

    fn evaluate_composite(
        &self,
        results: &BTreeMap<usize, SubjectSet>,
        expression: &str,
        context: &EvaluationContext,
    ) -> Result<SubjectSet> {
        if self.composite_fails {
            return Err(AdHocError::Persistence("connection reset".into()));
        }
        self.population.evaluate_composite(results, expression, context)
    }

    fn all_subjects(&self, context: &EvaluationContext) -> Result<SubjectSet> {
        self.population.all_subjects(context)
    }
}

fn three_filters() -> AdHocDataset {
    AdHocDataset::new("three")
        .with_row_filter(RowFilterDescriptor::new("males"))
        .with_row_filter(RowFilterDescriptor::new("females"))
        .with_row_filter(RowFilterDescriptor::new("everyone"))
        .with_composition("1 OR 2 OR 3")
}

#[test]
fn failing_filter_stops_the_request_and_names_the_filter() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let store = FlakyStore::new(&population, "females", false);
    let engine = Engine::new(&library, &converter, &store, &population);
    let err = engine
        .evaluate(&three_filters(), EvaluationMode::RowFilterDiagnostic)
        .unwrap_err();
    match &err {
        AdHocError::Evaluation { target, message } => {
            assert_eq!(target, "row filter 2 (females)");
            assert!(message.contains("store offline"), "{message}");
        }
        other => panic!("expected an evaluation error, got {other}"),
    }
    // the third filter is never evaluated
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failing_composite_names_the_expression() {
    let (population, library) = setup();
    let converter = StandardConverter::with_resolver(&population);
    let store = FlakyStore::new(&population, "none", true);
    let engine = Engine::new(&library, &converter, &store, &population);
    let err = engine
        .evaluate(&three_filters(), EvaluationMode::Full)
        .unwrap_err();
    match &err {
        AdHocError::Evaluation { target, message } => {
            assert_eq!(target, "composition '1 OR 2 OR 3'");
            assert!(message.contains("connection reset"), "{message}");
        }
        other => panic!("expected an evaluation error, got {other}"),
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

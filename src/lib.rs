//! adhoc_dataset – composition and evaluation of ad-hoc tabular extracts.
//!
//! A caller describes an extract over a population of *subjects* without
//! writing a query:
//! * A [`descriptor::RowFilterDescriptor`] names a library filter template by key
//!   and supplies (untyped) parameter values for it.
//! * A [`descriptor::ColumnDescriptor`] does the same for a per-subject column.
//! * An [`descriptor::AdHocDataset`] holds the ordered filters and columns, the
//!   dataset-level parameters, and optionally a custom composition string such
//!   as `"1 AND (2 OR NOT 3)"` over the 1-based filter positions.
//!
//! The [`engine::Engine`] resolves every key against a
//! [`library::LibraryRegistry`], coerces parameter values against the declared
//! [`parameter::ParameterSpec`]s, fills unbound parameters with their
//! pass-through defaults, evaluates each filter, composes the results (all
//! positions AND-ed together unless told otherwise), and finally evaluates all
//! columns in one pass over the surviving subjects.
//!
//! ## Modules
//! * [`datatype`] – parameter types, collection kinds and typed values.
//! * [`convert`] – the type conversion seam and parameter value coercion.
//! * [`parameter`] – parameter specs, default mapping and instantiation.
//! * [`subject`] – subject id sets (roaring bitmaps) and preview capping.
//! * [`descriptor`] – the declarative dataset model.
//! * [`library`] – the registry of filter and column templates.
//! * [`evaluator`] – evaluator contracts, evaluation context and tables.
//! * [`composition`] – the composition string grammar (see `composition.pest`).
//! * [`compose`] – evaluation and composition of row filters.
//! * [`columns`] – column expansion and evaluation.
//! * [`engine`] – the `evaluate(descriptor, mode)` surface.
//! * [`population`] – an in-memory subject store implementing the evaluators.
//! * [`persist`] – SQLite storage for descriptors, run definitions and requests.
//! * [`lifecycle`] – save/load/purge of ad-hoc descriptors and garbage collection.
//! * [`config`] – settings.
//!
//! ## Evaluation modes
//! * `Full` – the table over the whole composed population.
//! * `RowFilterDiagnostic` – the combined subject set plus each filter's own set.
//! * `Preview` – the table over the first ten subjects of the composed
//!   population, with the uncapped combined set for "N total" reporting.
//!
//! ## Quick Start
//! ```
//! use adhoc_dataset::convert::StandardConverter;
//! use adhoc_dataset::descriptor::{AdHocDataset, ColumnDescriptor, RowFilterDescriptor};
//! use adhoc_dataset::engine::{Engine, EvaluationMode};
//! use adhoc_dataset::library::{Gender, Library};
//! use adhoc_dataset::population::{Population, Subject};
//!
//! let population = Population::from_subjects(vec![Subject {
//!     id: 1,
//!     uuid: "a1".into(),
//!     given_name: Some("Alice".into()),
//!     family_name: None,
//!     gender: Gender::Female,
//!     birthdate: None,
//! }]);
//! let library = Library::standard();
//! let converter = StandardConverter::with_resolver(&population);
//! let engine = Engine::new(&library, &converter, &population, &population);
//! let dataset = AdHocDataset::new("women")
//!     .with_row_filter(RowFilterDescriptor::new("females"))
//!     .with_column(ColumnDescriptor::new("givenName", "Given Name"));
//! let evaluation = engine.evaluate(&dataset, EvaluationMode::Full).unwrap();
//! assert_eq!(evaluation.table().unwrap().len(), 1);
//! ```
//!
//! ## Persistence
//! The [`persist::Persistor`] keeps saved descriptors, disposable run
//! definitions, run requests and rendering artifacts in SQLite. Saved ad-hoc
//! descriptors carry a name prefix (see [`lifecycle::AD_HOC_PREFIX`]) that is
//! never shown to callers. [`lifecycle::LifecycleManager::garbage_collect`] is
//! meant to be called periodically by whatever scheduler the host has.

pub mod columns;
pub mod compose;
pub mod composition;
pub mod config;
pub mod convert;
pub mod datatype;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod library;
pub mod lifecycle;
pub mod parameter;
pub mod persist;
pub mod population;
pub mod subject;

pub use error::{AdHocError, Result};

//! The library of named filter and column templates.
//!
//! Templates are a closed set of variants ([`FilterKind`], [`ColumnKind`])
//! registered under string keys. Adding a template means registering a variant,
//! never loading anything by name at runtime.

use seahash::SeaHasher;
use serde::{Deserialize, Serialize};

use core::hash::BuildHasherDefault;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::datatype::ParameterType;
use crate::error::{AdHocError, Result};
use crate::parameter::{ParameterSpec, Parameterizable};

pub type KeyHasher = BuildHasherDefault<SeaHasher>;

// ------------- SubjectDomain -------------
/// The kind of subject a dataset, filter or column is about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectDomain {
    #[default]
    Person,
    Visit,
}

impl fmt::Display for SubjectDomain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubjectDomain::Person => write!(f, "person"),
            SubjectDomain::Visit => write!(f, "visit"),
        }
    }
}
impl FromStr for SubjectDomain {
    type Err = AdHocError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "person" => Ok(SubjectDomain::Person),
            "visit" => Ok(SubjectDomain::Visit),
            other => Err(AdHocError::Configuration(format!("unknown subject domain '{other}'"))),
        }
    }
}

// ------------- Kinds -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Row filter implementations known to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FilterKind {
    Everyone,
    Gender { gender: Gender },
    /// Reads `minAge`, `maxAge` and `effectiveDate`.
    AgeRange,
    /// Reads `startDate` and `endDate`.
    BirthDateRange,
    /// Reads `subjects`.
    SubjectsIn,
}

/// Column implementations known to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ColumnKind {
    SubjectId,
    Uuid,
    GivenName,
    FamilyName,
    Gender,
    BirthDate,
    /// Reads `effectiveDate`, defaulting to today.
    AgeOnDate,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ------------- Template -------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template<K> {
    pub key: String,
    pub kind: K,
    pub domain: SubjectDomain,
    pub parameters: Vec<ParameterSpec>,
}

pub type FilterTemplate = Template<FilterKind>;
pub type ColumnTemplate = Template<ColumnKind>;

impl<K> Template<K> {
    pub fn new(key: &str, kind: K, domain: SubjectDomain, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            key: key.to_owned(),
            kind,
            domain,
            parameters,
        }
    }
    /// Fails unless the template applies to `domain`.
    pub fn check_domain(&self, domain: SubjectDomain) -> Result<()> {
        if self.domain == domain {
            Ok(())
        } else {
            Err(AdHocError::Configuration(format!(
                "'{}' applies to {} subjects but the dataset is about {}",
                self.key, self.domain, domain
            )))
        }
    }
}

impl<K> Parameterizable for Template<K> {
    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    Filter(FilterTemplate),
    Column(ColumnTemplate),
}

impl Definition {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Definition::Filter(_) => "row filter",
            Definition::Column(_) => "column",
        }
    }
    pub fn parameters(&self) -> &[ParameterSpec] {
        match self {
            Definition::Filter(t) => t.parameters(),
            Definition::Column(t) => t.parameters(),
        }
    }
    pub fn domain(&self) -> SubjectDomain {
        match self {
            Definition::Filter(t) => t.domain,
            Definition::Column(t) => t.domain,
        }
    }
}

// ------------- Registry -------------
pub trait LibraryRegistry: Send + Sync {
    /// Looks up a template by key, failing with `NotFound` when unregistered.
    fn resolve(&self, key: &str) -> Result<&Definition>;

    /// Whether any template is registered for `domain`.
    fn supports(&self, domain: SubjectDomain) -> bool;

    fn filter(&self, key: &str) -> Result<&FilterTemplate> {
        match self.resolve(key)? {
            Definition::Filter(template) => Ok(template),
            other => Err(AdHocError::Configuration(format!(
                "'{key}' is a {}, not a row filter",
                other.kind_name()
            ))),
        }
    }

    fn column(&self, key: &str) -> Result<&ColumnTemplate> {
        match self.resolve(key)? {
            Definition::Column(template) => Ok(template),
            other => Err(AdHocError::Configuration(format!(
                "'{key}' is a {}, not a column",
                other.kind_name()
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct Library {
    kept: HashMap<String, Definition, KeyHasher>,
}

impl Library {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
        }
    }

    /// Registers a template, replacing any previous one under the same key.
    pub fn register(&mut self, definition: Definition) -> &mut Self {
        let key = match &definition {
            Definition::Filter(t) => t.key.clone(),
            Definition::Column(t) => t.key.clone(),
        };
        self.kept.insert(key, definition);
        self
    }
    pub fn register_filter(
        &mut self,
        key: &str,
        kind: FilterKind,
        parameters: Vec<ParameterSpec>,
    ) -> &mut Self {
        let template = Template::new(key, kind, SubjectDomain::Person, parameters);
        self.register(Definition::Filter(template))
    }
    pub fn register_column(
        &mut self,
        key: &str,
        kind: ColumnKind,
        parameters: Vec<ParameterSpec>,
    ) -> &mut Self {
        let template = Template::new(key, kind, SubjectDomain::Person, parameters);
        self.register(Definition::Column(template))
    }
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.kept.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }

    /// The person-level templates every deployment starts with.
    pub fn standard() -> Self {
        let min_age =
            || ParameterSpec::new("minAge", ParameterType::Integer).labelled("Minimum age");
        let max_age =
            || ParameterSpec::new("maxAge", ParameterType::Integer).labelled("Maximum age");
        let effective_date = || {
            ParameterSpec::new("effectiveDate", ParameterType::Date)
                .labelled("Effective date")
                .pass_through()
        };
        let mut library = Library::new();
        library
            .register_filter("everyone", FilterKind::Everyone, vec![])
            .register_filter("males", FilterKind::Gender { gender: Gender::Male }, vec![])
            .register_filter("females", FilterKind::Gender { gender: Gender::Female }, vec![])
            .register_filter(
                "atLeastAgeOnDate",
                FilterKind::AgeRange,
                vec![min_age().required().pass_through(), effective_date().required()],
            )
            .register_filter(
                "upToAgeOnDate",
                FilterKind::AgeRange,
                vec![max_age().required().pass_through(), effective_date().required()],
            )
            .register_filter(
                "ageRangeOnDate",
                FilterKind::AgeRange,
                vec![
                    min_age().pass_through(),
                    max_age().pass_through(),
                    effective_date().required(),
                ],
            )
            .register_filter(
                "bornBetween",
                FilterKind::BirthDateRange,
                vec![
                    ParameterSpec::new("startDate", ParameterType::Date).pass_through(),
                    ParameterSpec::new("endDate", ParameterType::Date).pass_through(),
                ],
            )
            .register_filter(
                "subjectsIn",
                FilterKind::SubjectsIn,
                vec![ParameterSpec::new("subjects", ParameterType::Subject).set().required()],
            )
            .register_column("subjectId", ColumnKind::SubjectId, vec![])
            .register_column("uuid", ColumnKind::Uuid, vec![])
            .register_column("givenName", ColumnKind::GivenName, vec![])
            .register_column("familyName", ColumnKind::FamilyName, vec![])
            .register_column("gender", ColumnKind::Gender, vec![])
            .register_column("birthdate", ColumnKind::BirthDate, vec![])
            .register_column("ageOnDate", ColumnKind::AgeOnDate, vec![effective_date()]);
        library
    }
}

impl LibraryRegistry for Library {
    fn resolve(&self, key: &str) -> Result<&Definition> {
        self.kept
            .get(key)
            .ok_or_else(|| AdHocError::NotFound(format!("no library entry named '{key}'")))
    }

    fn supports(&self, domain: SubjectDomain) -> bool {
        self.kept.values().any(|definition| definition.domain() == domain)
    }
}

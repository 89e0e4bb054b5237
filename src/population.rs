//! An in-memory subject store that evaluates the standard library templates.
//!
//! Hosts with their own data store implement [`FilterEvaluator`] and
//! [`TabularEvaluator`] themselves; this one backs the command line tool and
//! the tests.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap};

use crate::composition;
use crate::convert::ReferenceResolver;
use crate::datatype::Value;
use crate::error::{AdHocError, Result};
use crate::evaluator::{
    ColumnInstance, ColumnSetDefinition, EvaluationContext, FilterEvaluator, FilterInstance, Row,
    Table, TabularEvaluator,
};
use crate::library::{ColumnKind, FilterKind, Gender, KeyHasher};
use crate::parameter::ParameterValues;
use crate::subject::{SubjectId, SubjectSet};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    pub uuid: String,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    pub gender: Gender,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
}

impl Subject {
    pub fn age_on(&self, date: NaiveDate) -> Option<i64> {
        self.birthdate
            .and_then(|birthdate| date.years_since(birthdate))
            .map(i64::from)
    }
}

#[derive(Debug, Default)]
pub struct Population {
    subjects: BTreeMap<SubjectId, Subject>,
    by_uuid: HashMap<String, SubjectId, KeyHasher>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn from_subjects(subjects: impl IntoIterator<Item = Subject>) -> Self {
        let mut population = Self::new();
        for subject in subjects {
            population.add(subject);
        }
        population
    }
    pub fn from_json(json: &str) -> Result<Self> {
        let subjects: Vec<Subject> = serde_json::from_str(json)?;
        Ok(Self::from_subjects(subjects))
    }
    pub fn add(&mut self, subject: Subject) {
        self.by_uuid.insert(subject.uuid.clone(), subject.id);
        self.subjects.insert(subject.id, subject);
    }
    pub fn get(&self, id: SubjectId) -> Option<&Subject> {
        self.subjects.get(&id)
    }
    pub fn len(&self) -> usize {
        self.subjects.len()
    }
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    fn candidates<'p>(
        &'p self,
        context: &'p EvaluationContext,
    ) -> Box<dyn Iterator<Item = &'p Subject> + 'p> {
        match &context.base_population {
            Some(base) => Box::new(base.iter().filter_map(|id| self.subjects.get(&id))),
            None => Box::new(self.subjects.values()),
        }
    }

    fn matches(&self, filter: &FilterInstance, subject: &Subject) -> Result<bool> {
        let values = &filter.values;
        Ok(match &filter.kind {
            FilterKind::Everyone => true,
            FilterKind::Gender { gender } => subject.gender == *gender,
            FilterKind::AgeRange => {
                let on = date_value(filter, values, "effectiveDate")?.unwrap_or_else(today);
                let min = integer_value(filter, values, "minAge")?;
                let max = integer_value(filter, values, "maxAge")?;
                match subject.age_on(on) {
                    Some(age) => min.is_none_or(|m| age >= m) && max.is_none_or(|m| age <= m),
                    None => false,
                }
            }
            FilterKind::BirthDateRange => {
                let start = date_value(filter, values, "startDate")?;
                let end = date_value(filter, values, "endDate")?;
                match subject.birthdate {
                    Some(born) => start.is_none_or(|s| born >= s) && end.is_none_or(|e| born <= e),
                    None => false,
                }
            }
            FilterKind::SubjectsIn => values
                .get("subjects")
                .map(|v| v.elements().any(|e| *e == Value::Subject(subject.id)))
                .unwrap_or(false),
        })
    }

    fn cell(&self, column: &ColumnInstance, subject: &Subject) -> Result<Value> {
        let text = |s: &Option<String>| s.clone().map(Value::Text).unwrap_or(Value::Null);
        Ok(match column.kind {
            ColumnKind::SubjectId => Value::Integer(subject.id as i64),
            ColumnKind::Uuid => Value::Text(subject.uuid.clone()),
            ColumnKind::GivenName => text(&subject.given_name),
            ColumnKind::FamilyName => text(&subject.family_name),
            ColumnKind::Gender => Value::Text(
                match subject.gender {
                    Gender::Male => "M",
                    Gender::Female => "F",
                    Gender::Other => "O",
                }
                .to_owned(),
            ),
            ColumnKind::BirthDate => subject.birthdate.map(Value::Date).unwrap_or(Value::Null),
            ColumnKind::AgeOnDate => {
                let on = match column.values.get("effectiveDate") {
                    Some(v) => v.as_date().ok_or_else(|| {
                        AdHocError::evaluation(
                            format!("column {}", column.position),
                            "effectiveDate is not a date",
                        )
                    })?,
                    None => today(),
                };
                subject.age_on(on).map(Value::Integer).unwrap_or(Value::Null)
            }
        })
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn date_value(
    filter: &FilterInstance,
    values: &ParameterValues,
    name: &str,
) -> Result<Option<NaiveDate>> {
    match values.get(name) {
        None => Ok(None),
        Some(v) => v.as_date().map(Some).ok_or_else(|| {
            AdHocError::evaluation(filter.key.clone(), format!("{name} is not a date"))
        }),
    }
}

fn integer_value(
    filter: &FilterInstance,
    values: &ParameterValues,
    name: &str,
) -> Result<Option<i64>> {
    match values.get(name) {
        None => Ok(None),
        Some(v) => v.as_integer().map(Some).ok_or_else(|| {
            AdHocError::evaluation(filter.key.clone(), format!("{name} is not an integer"))
        }),
    }
}

impl FilterEvaluator for Population {
    fn evaluate(&self, filter: &FilterInstance, context: &EvaluationContext) -> Result<SubjectSet> {
        let mut result = SubjectSet::new();
        for subject in self.candidates(context) {
            if self.matches(filter, subject)? {
                result.insert(subject.id);
            }
        }
        Ok(result)
    }

    fn evaluate_composite(
        &self,
        results: &BTreeMap<usize, SubjectSet>,
        expression: &str,
        context: &EvaluationContext,
    ) -> Result<SubjectSet> {
        let universe = self.all_subjects(context)?;
        composition::evaluate(expression, results, &universe)
    }

    fn all_subjects(&self, context: &EvaluationContext) -> Result<SubjectSet> {
        Ok(self.candidates(context).map(|s| s.id).collect())
    }
}

impl TabularEvaluator for Population {
    fn evaluate(
        &self,
        definition: &ColumnSetDefinition,
        context: &EvaluationContext,
    ) -> Result<Table> {
        let mut table = Table::new(definition.column_names());
        for subject in self.candidates(context) {
            let mut values = BTreeMap::new();
            for column in &definition.columns {
                values.insert(column.name.clone(), self.cell(column, subject)?);
            }
            table.rows.push(Row {
                subject: subject.id,
                values,
            });
        }
        Ok(table)
    }
}

impl ReferenceResolver for Population {
    fn resolve_uuid(&self, uuid: &str) -> Option<SubjectId> {
        self.by_uuid.get(uuid).copied()
    }
    fn resolve_id(&self, id: SubjectId) -> Option<SubjectId> {
        self.subjects.contains_key(&id).then_some(id)
    }
}

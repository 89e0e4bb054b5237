//! Evaluation of composition strings such as `"1 AND (2 OR NOT 3)"`.
//!
//! Grammar details live in `composition.pest`. Precedence is NOT, then AND,
//! then OR; keywords are case-insensitive. `NOT` complements against the
//! universe passed in, which is the all-subjects population of the request.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use std::collections::BTreeMap;

use crate::error::{AdHocError, Result};
use crate::subject::SubjectSet;

#[derive(Parser)]
#[grammar = "composition.pest"]
struct CompositionParser;

/// Combines per-position results according to `expression`.
pub fn evaluate(
    expression: &str,
    results: &BTreeMap<usize, SubjectSet>,
    universe: &SubjectSet,
) -> Result<SubjectSet> {
    let mut pairs = CompositionParser::parse(Rule::composition, expression).map_err(|e| {
        AdHocError::Configuration(format!("malformed composition '{expression}': {e}"))
    })?;
    let root = pairs
        .next()
        .ok_or_else(|| AdHocError::Configuration(format!("empty composition '{expression}'")))?;
    Evaluator {
        expression,
        results,
        universe,
    }
    .eval(root)
}

struct Evaluator<'a> {
    expression: &'a str,
    results: &'a BTreeMap<usize, SubjectSet>,
    universe: &'a SubjectSet,
}

impl Evaluator<'_> {
    fn eval(&self, pair: Pair<Rule>) -> Result<SubjectSet> {
        match pair.as_rule() {
            Rule::disjunction => {
                let mut combined = SubjectSet::new();
                for inner in pair.into_inner() {
                    combined = &combined | &self.eval(inner)?;
                }
                Ok(combined)
            }
            Rule::conjunction => {
                let mut combined: Option<SubjectSet> = None;
                for inner in pair.into_inner() {
                    let next = self.eval(inner)?;
                    combined = Some(match combined {
                        Some(acc) => &acc & &next,
                        None => next,
                    });
                }
                Ok(combined.unwrap_or_default())
            }
            Rule::negation => {
                let mut negations = 0;
                let mut operand = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::not_op => negations += 1,
                        _ => operand = Some(self.eval(inner)?),
                    }
                }
                let operand = operand.unwrap_or_default();
                if negations % 2 == 1 {
                    Ok(self.universe - &operand)
                } else {
                    Ok(operand)
                }
            }
            Rule::position => {
                let position: usize = pair
                    .as_str()
                    .parse()
                    .map_err(|_| self.unknown(pair.as_str()))?;
                self.results
                    .get(&position)
                    .cloned()
                    .ok_or_else(|| self.unknown(pair.as_str()))
            }
            other => Err(AdHocError::Configuration(format!(
                "unexpected {other:?} in composition '{}'",
                self.expression
            ))),
        }
    }

    fn unknown(&self, position: &str) -> AdHocError {
        AdHocError::Configuration(format!(
            "composition '{}' references position {position} but only {} row filters are defined",
            self.expression,
            self.results.len()
        ))
    }
}

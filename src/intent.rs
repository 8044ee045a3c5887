//! Prompt-understanding score: does the code act on what the question asked for?

use crate::error::EngineError;
use crate::models::DatasetSchema;
use crate::patterns::{
    self, FRAME_ATTRIBUTE, PHRASE_RULES, PhraseCategory, QUOTED_LITERAL, STATISTICAL_RULES,
    StatisticalOperation,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

pub const COLUMN_WEIGHT: f64 = 0.4;
pub const NL_PARSING_WEIGHT: f64 = 0.3;
pub const STATISTICAL_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseMatch {
    pub category: PhraseCategory,
    pub implemented: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalMatch {
    pub operation: StatisticalOperation,
    pub implemented: bool,
}

/// Understanding dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderstandingBlock {
    pub mentioned_columns: Vec<String>,
    pub referenced_columns: Vec<String>,
    pub column_score: f64,
    pub phrases: Vec<PhraseMatch>,
    pub nl_parsing_score: f64,
    pub statistical_operations: Vec<StatisticalMatch>,
    pub statistical_score: f64,
    pub understanding_score: f64,
}

struct CompiledRule<K> {
    key: K,
    question: Vec<Regex>,
    code: Vec<Regex>,
}

impl<K: Copy> CompiledRule<K> {
    fn asked(&self, question: &str) -> bool {
        self.question.iter().any(|re| re.is_match(question))
    }

    fn implemented(&self, code: &str) -> bool {
        self.code.iter().any(|re| re.is_match(code))
    }
}

static PHRASES: LazyLock<Vec<CompiledRule<PhraseCategory>>> = LazyLock::new(|| {
    PHRASE_RULES
        .iter()
        .map(|rule| CompiledRule {
            key: rule.category,
            question: patterns::compile_all(rule.question),
            code: patterns::compile_all(rule.code),
        })
        .collect()
});

static STATISTICS: LazyLock<Vec<CompiledRule<StatisticalOperation>>> = LazyLock::new(|| {
    STATISTICAL_RULES
        .iter()
        .map(|rule| CompiledRule {
            key: rule.operation,
            question: patterns::compile_all(rule.question),
            code: patterns::compile_all(rule.code),
        })
        .collect()
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| patterns::compile(QUOTED_LITERAL));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| patterns::compile(FRAME_ATTRIBUTE));

/// Share of detected items that are implemented; full credit when nothing was asked
fn fraction(implemented: usize, detected: usize) -> f64 {
    if detected == 0 {
        1.0
    } else {
        implemented as f64 / detected as f64
    }
}

/// Schema columns named in the question, lowercase, in schema order
pub fn mentioned_columns(question: &str, schema: &DatasetSchema) -> Vec<String> {
    let question = question.to_lowercase();
    schema
        .names()
        .map(str::to_lowercase)
        .filter(|name| question.contains(name.as_str()) || question.contains(&name.replace('_', " ")))
        .collect()
}

/// Schema columns the code refers to, lowercase and sorted
pub fn referenced_columns(code: &str, schema: &DatasetSchema) -> Vec<String> {
    let known: BTreeSet<String> = schema.names().map(str::to_lowercase).collect();
    let mut found = BTreeSet::new();

    let quoted = QUOTED.captures_iter(code).filter_map(|c| c.get(1));
    let attributes = ATTRIBUTE.captures_iter(code).filter_map(|c| c.get(1));
    for candidate in quoted.chain(attributes) {
        let name = candidate.as_str().trim().to_lowercase();
        if known.contains(&name) {
            found.insert(name);
        }
    }
    found.into_iter().collect()
}

/// Detected phrase categories with whether the code implements each
pub fn phrase_matches(question: &str, code: &str) -> Vec<PhraseMatch> {
    let asked: Vec<&CompiledRule<PhraseCategory>> =
        PHRASES.iter().filter(|rule| rule.asked(question)).collect();
    let has_comparator = asked.iter().any(|rule| rule.key.is_comparator());

    asked
        .into_iter()
        .filter(|rule| rule.key != PhraseCategory::Logical || has_comparator)
        .map(|rule| PhraseMatch {
            category: rule.key,
            implemented: rule.implemented(code),
        })
        .collect()
}

/// Detected statistical operations with whether the code implements each
pub fn statistical_matches(question: &str, code: &str) -> Vec<StatisticalMatch> {
    STATISTICS
        .iter()
        .filter(|rule| rule.asked(question))
        .map(|rule| StatisticalMatch {
            operation: rule.key,
            implemented: rule.implemented(code),
        })
        .collect()
}

/// Align `question` against `code`. Fails only when the schema is malformed.
pub fn score(
    question: &str,
    code: &str,
    schema: &DatasetSchema,
) -> Result<UnderstandingBlock, EngineError> {
    schema.validate()?;

    let mentioned = mentioned_columns(question, schema);
    let referenced = referenced_columns(code, schema);
    let matched_columns = mentioned.iter().filter(|c| referenced.contains(c)).count();
    let column_score = fraction(matched_columns, mentioned.len());

    let phrases = phrase_matches(question, code);
    let nl_parsing_score = fraction(
        phrases.iter().filter(|p| p.implemented).count(),
        phrases.len(),
    );

    let statistical_operations = statistical_matches(question, code);
    let statistical_score = fraction(
        statistical_operations.iter().filter(|s| s.implemented).count(),
        statistical_operations.len(),
    );

    Ok(UnderstandingBlock {
        mentioned_columns: mentioned,
        referenced_columns: referenced,
        column_score,
        phrases,
        nl_parsing_score,
        statistical_operations,
        statistical_score,
        understanding_score: COLUMN_WEIGHT * column_score
            + NL_PARSING_WEIGHT * nl_parsing_score
            + STATISTICAL_WEIGHT * statistical_score,
    })
}

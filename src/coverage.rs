//! Multi-part requirement coverage: filters, grouping, sorting and joins asked for in
//! the question versus what the code does.

use crate::models::DatasetSchema;
use crate::patterns::{
    self, CLAUSE_TERMINATORS, CODE_COMPARISON_METHODS, CODE_COMPARISONS, CODE_GROUPBY,
    FILTER_COMPARATORS, FILTER_CONNECTORS, FILTER_EXPRESSION, FILTER_MARKERS, GROUP_MARKERS,
    JOIN_CALLS, JOIN_KEYWORDS, ORDERING_WORDS, QUERY_CALLS, QUOTED_LITERAL, SORT_CALLS,
    SORT_KEYWORDS,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const FILTER_WEIGHT: f64 = 0.3;
pub const GROUP_BY_WEIGHT: f64 = 0.3;
pub const SORT_WEIGHT: f64 = 0.2;
pub const JOIN_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Filter,
    GroupBy,
    Sort,
    Join,
}

impl fmt::Display for RequirementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequirementCategory::Filter => "filter",
            RequirementCategory::GroupBy => "group-by",
            RequirementCategory::Sort => "sort",
            RequirementCategory::Join => "join",
        };
        f.write_str(name)
    }
}

/// Expected versus found count for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCoverage {
    pub expected: usize,
    pub found: usize,
    pub coverage: f64,
}

impl CategoryCoverage {
    fn new(expected: usize, found: usize) -> Self {
        let coverage = if expected == 0 {
            1.0
        } else {
            (found as f64 / expected as f64).min(1.0)
        };
        Self {
            expected,
            found,
            coverage,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.expected > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRequirement {
    pub category: RequirementCategory,
    pub expected: usize,
    pub found: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
    pub detail: String,
}

/// Coverage dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageBlock {
    pub filter: CategoryCoverage,
    pub group_by: CategoryCoverage,
    /// Grouping columns asked for, schema spelling where known
    pub group_by_columns: Vec<String>,
    pub sort: CategoryCoverage,
    pub join: CategoryCoverage,
    pub missing_requirements: Vec<MissingRequirement>,
    pub coverage_score: f64,
}

/// Alternation of weighted patterns matched leftmost-first
struct WeightedAlternation {
    regex: Regex,
    weights: Vec<usize>,
}

impl WeightedAlternation {
    fn new(table: &[(&str, usize)]) -> Self {
        let joined = table
            .iter()
            .map(|(pattern, _)| format!("({pattern})"))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            regex: patterns::compile(&joined),
            weights: table.iter().map(|(_, weight)| *weight).collect(),
        }
    }

    /// Sum of weights over every match, and the start of the first match
    fn tally(&self, text: &str) -> (usize, Option<usize>) {
        let mut total = 0;
        let mut first = None;
        for caps in self.regex.captures_iter(text) {
            let Some(index) = (1..caps.len()).find(|i| caps.get(*i).is_some()) else {
                continue;
            };
            if let Some(whole) = caps.get(0) {
                first.get_or_insert(whole.start());
            }
            total += self.weights[index - 1];
        }
        (total, first)
    }
}

struct Compiled {
    comparators: WeightedAlternation,
    markers: Vec<Regex>,
    connectors: Regex,
    code_operators: WeightedAlternation,
    code_methods: WeightedAlternation,
    filter_expression: Regex,
    query_calls: Vec<Regex>,
    group_markers: Regex,
    code_groupby: Regex,
    quoted: Regex,
    sort_keywords: Regex,
    sort_calls: Regex,
    join_keywords: Regex,
    join_calls: Regex,
}

static COMPILED: LazyLock<Compiled> = LazyLock::new(|| Compiled {
    comparators: WeightedAlternation::new(FILTER_COMPARATORS),
    markers: patterns::compile_all(FILTER_MARKERS),
    connectors: patterns::compile(FILTER_CONNECTORS),
    code_operators: WeightedAlternation::new(CODE_COMPARISONS),
    code_methods: WeightedAlternation::new(CODE_COMPARISON_METHODS),
    filter_expression: patterns::compile(FILTER_EXPRESSION),
    query_calls: patterns::compile_all(QUERY_CALLS),
    group_markers: patterns::compile(GROUP_MARKERS),
    code_groupby: patterns::compile(CODE_GROUPBY),
    quoted: patterns::compile(QUOTED_LITERAL),
    sort_keywords: patterns::compile(SORT_KEYWORDS),
    sort_calls: patterns::compile(SORT_CALLS),
    join_keywords: patterns::compile(JOIN_KEYWORDS),
    join_calls: patterns::compile(JOIN_CALLS),
});

const CLAUSE_BREAKS: &[char] = &['.', ';', '?', '!'];

/// Number of filter conditions the question implies
pub fn expected_filters(question: &str) -> usize {
    let c = &*COMPILED;
    let (comparators, first_comparator) = c.comparators.tally(question);
    let first_marker = c
        .markers
        .iter()
        .filter_map(|re| re.find(question).map(|m| m.start()))
        .min();

    let first_signal = match (first_comparator, first_marker) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => match a.or(b) {
            Some(position) => position,
            None => return 0,
        },
    };
    let tail = &question[first_signal..];
    let comparator_spans: Vec<(usize, usize)> = c
        .comparators
        .regex
        .find_iter(tail)
        .map(|m| (m.start(), m.end()))
        .collect();
    let signal_starts: Vec<usize> = comparator_spans
        .iter()
        .map(|(start, _)| *start)
        .chain(
            c.markers
                .iter()
                .flat_map(|re| re.find_iter(tail).map(|m| m.start())),
        )
        .collect();

    // a connector chains a condition only when another condition follows it in the
    // same clause; the "or" of "greater than or equal" belongs to its comparator
    let linked = c
        .connectors
        .find_iter(tail)
        .filter(|m| {
            !comparator_spans
                .iter()
                .any(|(start, end)| *start <= m.start() && m.end() <= *end)
        })
        .filter(|m| {
            let clause_end = tail[m.end()..]
                .find(CLAUSE_BREAKS)
                .map_or(tail.len(), |offset| m.end() + offset);
            signal_starts
                .iter()
                .any(|start| *start >= m.end() && *start < clause_end)
        })
        .count();
    let chained = linked + 1;
    let marked = usize::from(first_marker.is_some());

    comparators.max(marked).max(chained)
}

/// Number of filter conditions the code applies
pub fn actual_filters(code: &str) -> usize {
    let c = &*COMPILED;
    let (methods, _) = c.code_methods.tally(code);
    let filtering = c.filter_expression.is_match(code) || c.query_calls.iter().any(|re| re.is_match(code));
    let operators = if filtering {
        c.code_operators.tally(code).0
    } else {
        0
    };
    operators + methods
}

fn preceding_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_alphanumeric() && ch != '_')
        .filter(|w| !w.is_empty())
}

fn resolve_column(item: &str, schema: &DatasetSchema) -> Option<String> {
    let underscored = item.replace(' ', "_");
    schema
        .names()
        .find(|name| {
            let name = name.to_lowercase();
            name == item || name == underscored
        })
        .map(str::to_string)
}

/// Split the text after a group marker into column items, stopping at the end of the clause
fn group_items(tail: &str) -> Vec<String> {
    let clause = tail
        .split(['?', '.', ';', ':', '!', '(', ')'])
        .next()
        .unwrap_or("");
    let spaced = clause.replace(',', " , ").replace('&', " & ");

    let mut items = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in spaced.split_whitespace() {
        if CLAUSE_TERMINATORS.contains(&word) {
            break;
        }
        if matches!(word, "," | "&" | "and") {
            if !current.is_empty() {
                items.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        if current.is_empty() && matches!(word, "the" | "each" | "a") {
            continue;
        }
        current.push(word);
    }
    if !current.is_empty() {
        items.push(current.join(" "));
    }
    items
}

/// Grouping columns the question asks for. Items matching a schema column use the
/// schema spelling.
pub fn expected_group_columns(question: &str, schema: &DatasetSchema) -> Vec<String> {
    let question = question.to_lowercase();
    let mut columns: Vec<String> = Vec::new();

    for marker in COMPILED.group_markers.find_iter(&question) {
        let bare_by = marker.as_str().trim() == "by";
        if bare_by
            && preceding_words(&question[..marker.start()]).any(|w| ORDERING_WORDS.contains(&w))
        {
            continue;
        }

        let items: Vec<(String, bool)> = group_items(&question[marker.end()..])
            .into_iter()
            .map(|item| match resolve_column(&item, schema) {
                Some(name) => (name, true),
                None => (item, false),
            })
            .collect();
        if bare_by && items.len() < 2 && !items.iter().any(|(_, known)| *known) {
            continue;
        }

        for (item, _) in items {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&item)) {
                columns.push(item);
            }
        }
    }
    columns
}

/// Lowercase grouping keys the code passes as literals, plus the number of grouping calls
fn code_group_keys(code: &str) -> (Vec<String>, usize) {
    let c = &*COMPILED;
    let mut keys = Vec::new();
    let mut calls = 0;
    for caps in c.code_groupby.captures_iter(code) {
        calls += 1;
        let Some(args) = caps.get(1) else { continue };
        for literal in c.quoted.captures_iter(args.as_str()).filter_map(|l| l.get(1)) {
            keys.push(literal.as_str().trim().to_lowercase());
        }
    }
    (keys, calls)
}

fn group_key_matches(expected: &str, key: &str) -> bool {
    let expected = expected.to_lowercase();
    key == expected || key == expected.replace(' ', "_")
}

fn shortfall(category: RequirementCategory, coverage: &CategoryCoverage) -> MissingRequirement {
    MissingRequirement {
        category,
        expected: coverage.expected,
        found: coverage.found,
        missing_columns: Vec::new(),
        detail: format!(
            "expected {} {category} requirement(s), found {}",
            coverage.expected, coverage.found
        ),
    }
}

/// Check which requested operations the code covers
pub fn score(question: &str, code: &str, schema: &DatasetSchema) -> CoverageBlock {
    let c = &*COMPILED;

    let filter = CategoryCoverage::new(expected_filters(question), actual_filters(code));

    let group_by_columns = expected_group_columns(question, schema);
    let (keys, group_calls) = code_group_keys(code);
    let missing_columns: Vec<String> = if keys.is_empty() && group_calls > 0 {
        // grouped by something not spelled as a literal; trust the call count
        group_by_columns.iter().skip(group_calls).cloned().collect()
    } else {
        group_by_columns
            .iter()
            .filter(|col| !keys.iter().any(|key| group_key_matches(col, key)))
            .cloned()
            .collect()
    };
    let group_by = CategoryCoverage::new(
        group_by_columns.len(),
        group_by_columns.len() - missing_columns.len(),
    );

    let sort = CategoryCoverage::new(
        usize::from(c.sort_keywords.is_match(question)),
        c.sort_calls.find_iter(code).count(),
    );
    let join = CategoryCoverage::new(
        usize::from(c.join_keywords.is_match(question)),
        c.join_calls.find_iter(code).count(),
    );

    let mut missing_requirements = Vec::new();
    if filter.coverage < 1.0 {
        missing_requirements.push(shortfall(RequirementCategory::Filter, &filter));
    }
    if group_by.coverage < 1.0 {
        let mut requirement = shortfall(RequirementCategory::GroupBy, &group_by);
        requirement.detail = format!("not grouped by: {}", missing_columns.join(", "));
        requirement.missing_columns = missing_columns;
        missing_requirements.push(requirement);
    }
    if sort.coverage < 1.0 {
        missing_requirements.push(shortfall(RequirementCategory::Sort, &sort));
    }
    if join.coverage < 1.0 {
        missing_requirements.push(shortfall(RequirementCategory::Join, &join));
    }

    let coverage_score = FILTER_WEIGHT * filter.coverage
        + GROUP_BY_WEIGHT * group_by.coverage
        + SORT_WEIGHT * sort.coverage
        + JOIN_WEIGHT * join.coverage;

    CoverageBlock {
        filter,
        group_by,
        group_by_columns,
        sort,
        join,
        missing_requirements,
        coverage_score,
    }
}

//! Heuristic time/space complexity inference from code text.
//!
//! Classification is a fixed function of the text: explicit loop nesting gives a floor,
//! known vectorized calls give buckets, and the most severe one wins. Nothing here
//! claims to be an asymptotic proof.

use crate::models::ComplexityClass;
use crate::patterns::{
    self, COMPREHENSION_FOR, FILTER_EXPRESSION, ROW_ITERATORS, SPACE_CALL_BUCKETS,
    TIME_CALL_BUCKETS,
};
use crate::syntax::strip_comment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeComplexity {
    pub class: ComplexityClass,
    pub score: f64,
    pub nested_loop_depth: usize,
    pub matched_operation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceComplexity {
    pub class: ComplexityClass,
    pub score: f64,
    pub estimated_memory_mb: f64,
}

struct CompiledBuckets {
    time: Vec<(ComplexityClass, Vec<Regex>)>,
    space: Vec<(ComplexityClass, Vec<Regex>)>,
    filter: Regex,
    row_iterators: Regex,
    comprehension: Regex,
}

static BUCKETS: LazyLock<CompiledBuckets> = LazyLock::new(|| CompiledBuckets {
    time: TIME_CALL_BUCKETS
        .iter()
        .map(|(class, list)| (*class, patterns::compile_all(list)))
        .collect(),
    space: SPACE_CALL_BUCKETS
        .iter()
        .map(|(class, list)| (*class, patterns::compile_all(list)))
        .collect(),
    filter: patterns::compile(FILTER_EXPRESSION),
    row_iterators: patterns::compile(ROW_ITERATORS),
    comprehension: patterns::compile(COMPREHENSION_FOR),
});

/// Upper bound on the super-linear memory multiplier
const MAX_QUADRATIC_MULTIPLIER: f64 = 16.0;

/// Infer the time complexity of `code`
pub fn analyze_time(code: &str) -> TimeComplexity {
    let depth = max_loop_depth(code);
    let mut class = ComplexityClass::from_loop_depth(depth);
    let mut matched = 0;

    for (bucket, regexes) in &BUCKETS.time {
        for regex in regexes {
            let hits = regex.find_iter(code).count();
            if hits > 0 {
                matched += hits;
                class = class.max(*bucket);
            }
        }
    }

    TimeComplexity {
        class,
        score: class.score(),
        nested_loop_depth: depth,
        matched_operation_count: matched,
    }
}

/// Infer the space complexity of `code`, scaling `dataset_size_mb` into a memory estimate
pub fn analyze_space(code: &str, dataset_size_mb: Option<f64>) -> SpaceComplexity {
    let mut class = ComplexityClass::Constant;

    if BUCKETS.filter.is_match(code) {
        class = ComplexityClass::Linear;
    }
    for (bucket, regexes) in &BUCKETS.space {
        if regexes.iter().any(|regex| regex.is_match(code)) {
            class = class.max(*bucket);
        }
    }

    let estimated_memory_mb = dataset_size_mb
        .filter(|size| size.is_finite() && *size > 0.0)
        .map(|size| size * memory_multiplier(class, size))
        .unwrap_or(0.0);

    SpaceComplexity {
        class,
        score: class.score(),
        estimated_memory_mb,
    }
}

fn memory_multiplier(class: ComplexityClass, size_mb: f64) -> f64 {
    match class {
        ComplexityClass::Constant | ComplexityClass::Logarithmic => 1.0,
        ComplexityClass::Linear | ComplexityClass::Linearithmic => 2.0,
        ComplexityClass::Quadratic | ComplexityClass::Cubic => {
            (4.0 + (1.0 + size_mb).log2()).min(MAX_QUADRATIC_MULTIPLIER)
        }
    }
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn is_loop_header(trimmed: &str) -> bool {
    (trimmed.starts_with("for ") && trimmed.contains(" in ")) || trimmed.starts_with("while ")
}

/// Deepest iteration nesting: loop blocks nest by indentation, comprehensions and
/// row-wise iterator calls nest within their line.
pub fn max_loop_depth(code: &str) -> usize {
    let mut open_loops: Vec<usize> = Vec::new();
    let mut max_depth = 0;

    for raw in code.lines() {
        let line = strip_comment(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let indent = indentation(line);
        while open_loops.last().is_some_and(|level| *level >= indent) {
            open_loops.pop();
        }
        let enclosing = open_loops.len();

        if is_loop_header(trimmed) {
            max_depth = max_depth.max(enclosing + 1);
            if trimmed.ends_with(':') {
                open_loops.push(indent);
            }
            continue;
        }

        let mut inline = BUCKETS.comprehension.find_iter(trimmed).count();
        if BUCKETS.row_iterators.is_match(trimmed) {
            inline += 1;
        }
        max_depth = max_depth.max(enclosing + inline);
    }

    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_reduction() {
        let code = "result = df['sales'].mean()";
        let time = analyze_time(code);
        let space = analyze_space(code, None);
        assert_eq!(time.class, ComplexityClass::Linear);
        assert_eq!(time.matched_operation_count, 1);
        assert_eq!(time.nested_loop_depth, 0);
        assert_eq!(space.class, ComplexityClass::Constant);
        assert_eq!(space.estimated_memory_mb, 0.0);
    }

    #[test]
    fn test_two_table_merge_is_quadratic() {
        let code = "result = orders.merge(customers, on='customer_id')";
        assert_eq!(analyze_time(code).class, ComplexityClass::Quadratic);
        assert_eq!(analyze_space(code, None).class, ComplexityClass::Quadratic);
    }

    #[test]
    fn test_triple_nested_loop_is_cubic() {
        let code = "total = 0\n\
                    for i in range(n):\n    for j in range(n):\n        for k in range(n):\n            total += i * j * k\n";
        let time = analyze_time(code);
        assert_eq!(time.nested_loop_depth, 3);
        assert_eq!(time.class, ComplexityClass::Cubic);
        assert_eq!(time.score, 0.1);
    }

    #[test]
    fn test_sequential_loops_do_not_nest() {
        let code = "for a in x:\n    pass\nfor b in y:\n    pass\n";
        assert_eq!(max_loop_depth(code), 1);
        assert_eq!(analyze_time(code).class, ComplexityClass::Linear);
    }

    #[test]
    fn test_apply_inside_loop_nests() {
        let code = "for col in df.columns:\n    df[col] = df[col].apply(lambda v: v * 2)\n";
        assert_eq!(max_loop_depth(code), 2);
        assert_eq!(analyze_time(code).class, ComplexityClass::Quadratic);
    }

    #[test]
    fn test_hash_inside_string_keeps_loop_header() {
        let code = "while df['col#1'].sum() > 0:  # drain\n    for x in items:\n        total += x\n";
        assert_eq!(max_loop_depth(code), 2);
    }

    #[test]
    fn test_comprehension_counts_as_loop() {
        assert_eq!(max_loop_depth("names = [c.upper() for c in df.columns]"), 1);
        assert_eq!(
            max_loop_depth("pairs = [(a, b) for a in xs for b in ys]"),
            2
        );
    }

    #[test]
    fn test_head_only_is_constant() {
        let code = "result = df.head(5)";
        let time = analyze_time(code);
        assert_eq!(time.class, ComplexityClass::Constant);
        assert_eq!(time.score, 1.0);
    }

    #[test]
    fn test_sort_is_linearithmic() {
        let code = "result = df.sort_values('price', ascending=False).head(10)";
        let time = analyze_time(code);
        assert_eq!(time.class, ComplexityClass::Linearithmic);
        assert_eq!(time.matched_operation_count, 2);
        assert_eq!(analyze_space(code, None).class, ComplexityClass::Linear);
    }

    #[test]
    fn test_searchsorted_is_logarithmic() {
        assert_eq!(
            analyze_time("pos = df['ts'].searchsorted(value)").class,
            ComplexityClass::Logarithmic
        );
    }

    #[test]
    fn test_loop_floor_beats_cheap_call() {
        let code = "for row in df.itertuples():\n    print(row)\nresult = df.head()";
        assert_eq!(analyze_time(code).class, ComplexityClass::Linear);
    }

    #[test]
    fn test_filter_raises_space_to_linear() {
        let space = analyze_space("result = df[df['price'] > 10]", Some(10.0));
        assert_eq!(space.class, ComplexityClass::Linear);
        assert_eq!(space.estimated_memory_mb, 20.0);
    }

    #[test]
    fn test_memory_estimate_multipliers() {
        assert_eq!(analyze_space("x = df.shape", Some(8.0)).estimated_memory_mb, 8.0);

        // 4 + log2(1 + 1) = 5
        let merged = analyze_space("m = a.merge(b)", Some(1.0));
        assert!((merged.estimated_memory_mb - 5.0).abs() < 1e-9);

        // huge inputs hit the cap
        let huge = analyze_space("m = a.merge(b)", Some(1_000_000.0));
        assert!((huge.estimated_memory_mb - 16_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let code = "g = df.groupby('region')['sales'].sum().sort_values()";
        assert_eq!(analyze_time(code), analyze_time(code));
        assert_eq!(analyze_space(code, Some(3.0)), analyze_space(code, Some(3.0)));
    }
}

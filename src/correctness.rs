use crate::models::{ExecutionOutcome, ExecutionValue};
use crate::syntax::{self, SyntaxIssue};
use serde::{Deserialize, Serialize};

/// Absolute tolerance for numeric comparisons against an expected value
pub const NUMERIC_TOLERANCE: f64 = 0.01;

/// Correctness dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectnessBlock {
    pub syntax_valid: bool,
    pub syntax_errors: Vec<SyntaxIssue>,
    pub execution_success: bool,
    pub execution_error: Option<String>,
    /// Set only when an expected value was supplied
    pub expected_match: Option<bool>,
    pub correctness_score: f64,
}

/// Score syntax validity plus either execution success or a match against `expected`
pub fn score(
    code: &str,
    outcome: &ExecutionOutcome,
    expected: Option<&ExecutionValue>,
) -> CorrectnessBlock {
    let syntax_errors = match syntax::check(code) {
        Ok(()) if code.trim().is_empty() => vec![SyntaxIssue {
            line: 1,
            message: "no code to evaluate".to_string(),
        }],
        Ok(()) => Vec::new(),
        Err(issue) => vec![issue],
    };
    let syntax_valid = syntax_errors.is_empty();

    let expected_match = expected.map(|want| {
        outcome.success
            && outcome
                .result
                .as_ref()
                .is_some_and(|got| values_match(got, want))
    });
    let execution_term = expected_match.unwrap_or(outcome.success);

    let correctness_score = (indicator(syntax_valid) + indicator(execution_term)) / 2.0;

    CorrectnessBlock {
        syntax_valid,
        syntax_errors,
        execution_success: outcome.success,
        execution_error: (!outcome.success).then(|| outcome.error_text().to_string()),
        expected_match,
        correctness_score,
    }
}

fn indicator(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}

/// Scalars within tolerance; tables by shape and cell-wise equality
pub fn values_match(actual: &ExecutionValue, expected: &ExecutionValue) -> bool {
    match (actual, expected) {
        (ExecutionValue::Number(a), ExecutionValue::Number(b)) => {
            (a - b).abs() <= NUMERIC_TOLERANCE
        }
        (
            ExecutionValue::Table { columns: ac, rows: ar },
            ExecutionValue::Table { columns: ec, rows: er },
        ) => {
            ac.len() == ec.len()
                && ar.len() == er.len()
                && ar.iter().zip(er).all(|(arow, erow)| {
                    arow.len() == erow.len()
                        && arow.iter().zip(erow).all(|(a, e)| cells_match(a, e))
                })
        }
        (ExecutionValue::Text(a), ExecutionValue::Text(b)) => a.trim() == b.trim(),
        (ExecutionValue::Chart, ExecutionValue::Chart) => true,
        _ => false,
    }
}

fn cells_match(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() <= NUMERIC_TOLERANCE,
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(rows: Vec<Vec<serde_json::Value>>) -> ExecutionValue {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        ExecutionValue::Table {
            columns: (0..width).map(|i| format!("c{i}")).collect(),
            rows,
        }
    }

    #[test]
    fn test_valid_and_successful() {
        let block = score(
            "result = df['a'].sum()",
            &ExecutionOutcome::succeeded(0.1, None),
            None,
        );
        assert!(block.syntax_valid);
        assert!(block.execution_success);
        assert_eq!(block.correctness_score, 1.0);
        assert_eq!(block.execution_error, None);
    }

    #[test]
    fn test_invalid_syntax_caps_score_at_half() {
        for outcome in [
            ExecutionOutcome::succeeded(0.1, None),
            ExecutionOutcome::failed("SyntaxError", None),
        ] {
            let block = score("result = df['a'].sum(", &outcome, None);
            assert!(!block.syntax_valid);
            assert_eq!(block.syntax_errors.len(), 1);
            assert!(block.correctness_score <= 0.5);
        }
    }

    #[test]
    fn test_empty_code_is_invalid() {
        let block = score("   \n", &ExecutionOutcome::failed("nothing ran", None), None);
        assert!(!block.syntax_valid);
        assert_eq!(block.correctness_score, 0.0);
        assert_eq!(block.execution_error.as_deref(), Some("nothing ran"));
    }

    #[test]
    fn test_expected_scalar_within_tolerance() {
        let outcome = ExecutionOutcome::succeeded(0.1, Some(ExecutionValue::Number(10.005)));
        let block = score("result = 10", &outcome, Some(&ExecutionValue::Number(10.0)));
        assert_eq!(block.expected_match, Some(true));
        assert_eq!(block.correctness_score, 1.0);

        let block = score("result = 10", &outcome, Some(&ExecutionValue::Number(10.5)));
        assert_eq!(block.expected_match, Some(false));
        assert_eq!(block.correctness_score, 0.5);
    }

    #[test]
    fn test_expected_replaces_execution_term() {
        // executed fine but produced nothing comparable
        let outcome = ExecutionOutcome::succeeded(0.1, None);
        let block = score("result = 1", &outcome, Some(&ExecutionValue::Number(1.0)));
        assert_eq!(block.expected_match, Some(false));
        assert_eq!(block.correctness_score, 0.5);
    }

    #[test]
    fn test_table_comparison() {
        let expected = table(vec![vec![json!("west"), json!(10.0)], vec![json!("east"), json!(4)]]);
        let close = table(vec![vec![json!("west"), json!(10.004)], vec![json!("east"), json!(4.0)]]);
        let wrong_cell = table(vec![vec![json!("west"), json!(10.0)], vec![json!("north"), json!(4)]]);
        let wrong_shape = table(vec![vec![json!("west"), json!(10.0)]]);

        assert!(values_match(&close, &expected));
        assert!(!values_match(&wrong_cell, &expected));
        assert!(!values_match(&wrong_shape, &expected));
        assert!(!values_match(&ExecutionValue::Number(10.0), &expected));
    }
}

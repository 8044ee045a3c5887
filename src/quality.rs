use crate::patterns::{self, SAFETY_DENYLIST, SafetyCategory};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const SAFETY_WEIGHT: f64 = 0.5;
pub const READABILITY_WEIGHT: f64 = 0.5;

/// Deducted from the safety score for each distinct denylist hit
const SAFETY_PENALTY: f64 = 0.2;

const COMMENT_WEIGHT: f64 = 0.4;
const LINE_COUNT_WEIGHT: f64 = 0.3;
const LINE_WIDTH_WEIGHT: f64 = 0.3;

/// Snippets up to this many lines do not need comments to read well
const SHORT_SNIPPET_LINES: usize = 10;
const COMFORTABLE_LINES: f64 = 30.0;
const MAX_LINES: f64 = 150.0;
const COMFORTABLE_WIDTH: f64 = 80.0;
const MAX_WIDTH: f64 = 160.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyIssue {
    pub category: SafetyCategory,
    pub pattern: String,
}

/// Quality dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBlock {
    pub has_comments: bool,
    pub line_count: usize,
    pub average_line_length: f64,
    pub safety_issues: Vec<SafetyIssue>,
    pub safety_score: f64,
    pub readability_score: f64,
    pub quality_score: f64,
}

static DENYLIST: LazyLock<Vec<(SafetyCategory, &'static str, Regex)>> = LazyLock::new(|| {
    SAFETY_DENYLIST
        .iter()
        .map(|(category, pattern)| (*category, *pattern, patterns::compile(pattern)))
        .collect()
});

static COMMENT: LazyLock<Regex> = LazyLock::new(|| patterns::compile(r"(?:^|\s)#"));

/// Denylist hits, one per distinct rule
pub fn safety_issues(code: &str) -> Vec<SafetyIssue> {
    DENYLIST
        .iter()
        .filter(|(_, _, regex)| regex.is_match(code))
        .map(|(category, pattern, _)| SafetyIssue {
            category: *category,
            pattern: pattern.to_string(),
        })
        .collect()
}

/// Linear falloff from 1.0 at `comfortable` down to 0.0 at `max`
fn falloff(value: f64, comfortable: f64, max: f64) -> f64 {
    if value <= comfortable {
        1.0
    } else {
        (1.0 - (value - comfortable) / (max - comfortable)).clamp(0.0, 1.0)
    }
}

/// Score safety and readability of `code`
pub fn score(code: &str) -> QualityBlock {
    let safety_issues = safety_issues(code);
    let safety_score = (1.0 - SAFETY_PENALTY * safety_issues.len() as f64).max(0.0);

    let lines: Vec<&str> = code
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let line_count = lines.len();
    let average_line_length = if line_count == 0 {
        0.0
    } else {
        lines.iter().map(|l| l.chars().count()).sum::<usize>() as f64 / line_count as f64
    };
    let has_comments = COMMENT.is_match(code);

    let readability_score = if line_count == 0 {
        0.0
    } else {
        let comment = if has_comments {
            1.0
        } else if line_count <= SHORT_SNIPPET_LINES {
            0.5
        } else {
            0.0
        };
        COMMENT_WEIGHT * comment
            + LINE_COUNT_WEIGHT * falloff(line_count as f64, COMFORTABLE_LINES, MAX_LINES)
            + LINE_WIDTH_WEIGHT * falloff(average_line_length, COMFORTABLE_WIDTH, MAX_WIDTH)
    };

    QualityBlock {
        has_comments,
        line_count,
        average_line_length,
        safety_issues,
        safety_score,
        readability_score,
        quality_score: SAFETY_WEIGHT * safety_score + READABILITY_WEIGHT * readability_score,
    }
}

//! Keyword and code-pattern tables consumed by the scorers.
//!
//! Every table here is plain constant data. Tuning a heuristic means editing a table
//! and bumping [`TABLES_VERSION`]; the scoring code never embeds its own keywords.
//! Patterns are compiled case-insensitive and multi-line by [`compile`].

use crate::models::{ComplexityClass, ErrorCategory};
use regex::Regex;

/// Recorded on every evaluation record so scores from different table revisions are
/// never compared blindly.
pub const TABLES_VERSION: u32 = 1;

/// Compile a table pattern. Table entries are literals checked by the tests below.
pub fn compile(pattern: &str) -> Regex {
    match Regex::new(&format!("(?im){pattern}")) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid pattern table entry {pattern:?}: {err}"),
    }
}

/// Compile a whole pattern list
pub fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| compile(p)).collect()
}

// ---------------------------------------------------------------------------
// Complexity

/// Vectorized calls and the time bucket each one implies
pub const TIME_CALL_BUCKETS: &[(ComplexityClass, &[&str])] = &[
    (ComplexityClass::Logarithmic, &[r"\.searchsorted\("]),
    (
        ComplexityClass::Constant,
        &[
            r"\.head\(",
            r"\.tail\(",
            r"\.iloc\[",
            r"\.iat\[",
            r"\.at\[",
            r"\.shape\b",
            r"\.dtypes\b",
        ],
    ),
    (
        ComplexityClass::Linear,
        &[
            r"\.mean\(",
            r"\.sum\(",
            r"\.count\(",
            r"\.min\(",
            r"\.max\(",
            r"\.median\(",
            r"\.std\(",
            r"\.var\(",
            r"\.unique\(",
            r"\.nunique\(",
            r"\.value_counts\(",
            r"\.groupby\(",
            r"\.agg\(",
            r"\.aggregate\(",
            r"\.dropna\(",
            r"\.fillna\(",
            r"\.isin\(",
            r"\.describe\(",
            r"\.idxmax\(",
            r"\.idxmin\(",
            r"\.cumsum\(",
        ],
    ),
    (
        ComplexityClass::Linearithmic,
        &[
            r"\.sort_values\(",
            r"\.sort_index\(",
            r"\.nlargest\(",
            r"\.nsmallest\(",
            r"\.rank\(",
        ],
    ),
    (
        ComplexityClass::Quadratic,
        &[r"\.merge\(", r"\.join\(", r"\bconcat\("],
    ),
];

/// Calls whose result is a new structure and the space bucket they imply
pub const SPACE_CALL_BUCKETS: &[(ComplexityClass, &[&str])] = &[
    (
        ComplexityClass::Linear,
        &[
            r"\.copy\(",
            r"\.drop\(",
            r"\.dropna\(",
            r"\.fillna\(",
            r"\.assign\(",
            r"\.reset_index\(",
            r"\.sort_values\(",
            r"\.to_frame\(",
        ],
    ),
    (
        ComplexityClass::Quadratic,
        &[
            r"\.merge\(",
            r"\.join\(",
            r"\bconcat\(",
            r"\.pivot\(",
            r"\.pivot_table\(",
        ],
    ),
];

/// Boolean-indexing filter: a subscript containing a comparison on one line
pub const FILTER_EXPRESSION: &str = r"\[[^\n]*?(?:>=|<=|==|!=|[<>])[^\n]*?\]";

/// Query-style filters
pub const QUERY_CALLS: &[&str] = &[r"\.query\(", r"\.where\(", r"\.loc\[[^\n]*?(?:>=|<=|==|!=|[<>])"];

/// Row-wise iteration hidden behind a call
pub const ROW_ITERATORS: &str = r"\.(?:iterrows|itertuples|apply|applymap)\(|\.map\(\s*lambda";

/// `for ... in` clause, used for comprehensions inside a line
pub const COMPREHENSION_FOR: &str = r"\bfor\s+[^\n]+?\s+in\s";

/// Keywords counted as control structures in the performance block
pub const CONTROL_KEYWORDS: &[&str] = &["if", "elif", "else", "for", "while", "try", "except", "with"];

// ---------------------------------------------------------------------------
// Safety

/// Denylist categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    FileWrite,
    ProcessExecution,
    DynamicEvaluation,
    OsImport,
    Network,
}

pub const SAFETY_DENYLIST: &[(SafetyCategory, &str)] = &[
    (SafetyCategory::FileWrite, r"\.to_csv\("),
    (SafetyCategory::FileWrite, r"\.to_excel\("),
    (SafetyCategory::FileWrite, r"\.to_parquet\("),
    (SafetyCategory::FileWrite, r"\.to_json\("),
    (SafetyCategory::FileWrite, r#"\bopen\([^)\n]*['"][wax][bt+]*['"]"#),
    (SafetyCategory::FileWrite, r"\.write\("),
    (SafetyCategory::ProcessExecution, r"\bos\.system\("),
    (SafetyCategory::ProcessExecution, r"\bos\.popen\("),
    (SafetyCategory::ProcessExecution, r"\bsubprocess\."),
    (SafetyCategory::DynamicEvaluation, r"\bexec\("),
    (SafetyCategory::DynamicEvaluation, r"\beval\("),
    (SafetyCategory::DynamicEvaluation, r"__import__\("),
    (SafetyCategory::DynamicEvaluation, r"\bcompile\("),
    (SafetyCategory::OsImport, r"^\s*import\s+(?:os|sys|subprocess|shutil)\b"),
    (SafetyCategory::OsImport, r"^\s*from\s+(?:os|sys|subprocess|shutil)\b"),
    (SafetyCategory::Network, r"\brequests\."),
    (SafetyCategory::Network, r"\burllib\."),
    (SafetyCategory::Network, r"\bhttp\.client\b"),
    (SafetyCategory::Network, r"\bsocket\."),
];

// ---------------------------------------------------------------------------
// Intent alignment

/// Question phrase categories checked against code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseCategory {
    TopN,
    BottomN,
    FirstRows,
    GreaterThan,
    LessThan,
    EqualTo,
    Logical,
}

impl PhraseCategory {
    /// Comparator phrases; `Logical` only counts alongside one of these
    pub fn is_comparator(self) -> bool {
        matches!(
            self,
            PhraseCategory::GreaterThan | PhraseCategory::LessThan | PhraseCategory::EqualTo
        )
    }
}

pub struct PhraseRule {
    pub category: PhraseCategory,
    pub question: &'static [&'static str],
    pub code: &'static [&'static str],
}

pub const PHRASE_RULES: &[PhraseRule] = &[
    PhraseRule {
        category: PhraseCategory::TopN,
        question: &[r"\btop\s+\d+", r"\b(?:largest|biggest|highest)\s+\d+"],
        code: &[
            r"\.nlargest\(",
            r"\.sort_values\([^)]*ascending\s*=\s*false",
            r"\.rank\(",
        ],
    },
    PhraseRule {
        category: PhraseCategory::BottomN,
        question: &[r"\bbottom\s+\d+", r"\b(?:smallest|lowest)\s+\d+"],
        code: &[r"\.nsmallest\(", r"\.sort_values\(", r"\.tail\("],
    },
    PhraseRule {
        category: PhraseCategory::FirstRows,
        question: &[r"\bfirst\s+\d+"],
        code: &[r"\.head\(", r"\.iloc\[\s*0?\s*:\s*\d+"],
    },
    PhraseRule {
        category: PhraseCategory::GreaterThan,
        question: &[
            r"\b(?:greater|more|higher|larger)\s+than\b",
            r"\babove\b",
            r"\bexceed(?:s|ing)?\b",
            r"\bat\s+least\b",
        ],
        code: &[r"[^-]>", r"\.gt\(", r"\.ge\(", r"\.between\("],
    },
    PhraseRule {
        category: PhraseCategory::LessThan,
        question: &[
            r"\b(?:less|fewer|lower|smaller)\s+than\b",
            r"\bbelow\b",
            r"\bat\s+most\b",
        ],
        code: &[r"<", r"\.lt\(", r"\.le\(", r"\.between\("],
    },
    PhraseRule {
        category: PhraseCategory::EqualTo,
        question: &[r"\bequal(?:s|\s+to)\b", r"\bis\s+exactly\b"],
        code: &[r"==", r"\.eq\(", r"\.isin\("],
    },
    PhraseRule {
        category: PhraseCategory::Logical,
        question: &[r"\band\b", r"\bor\b"],
        code: &[r"&", r"\|", r"\band\b", r"\bor\b"],
    },
];

/// Statistical operations recognised in questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalOperation {
    Mean,
    Sum,
    Max,
    Min,
    Count,
    GroupBy,
}

pub struct StatisticalRule {
    pub operation: StatisticalOperation,
    pub question: &'static [&'static str],
    pub code: &'static [&'static str],
}

pub const STATISTICAL_RULES: &[StatisticalRule] = &[
    StatisticalRule {
        operation: StatisticalOperation::Mean,
        question: &[r"\b(?:mean|average|avg)\b"],
        code: &[r"\.mean\(", r"\bnp\.average\(", r#"['"]mean['"]"#],
    },
    StatisticalRule {
        operation: StatisticalOperation::Sum,
        question: &[r"\b(?:sum|total)\b"],
        code: &[r"\.sum\(", r"\bsum\(", r#"['"]sum['"]"#],
    },
    StatisticalRule {
        operation: StatisticalOperation::Max,
        question: &[r"\b(?:max|maximum)\b"],
        code: &[r"\.max\(", r"\.idxmax\(", r"\.nlargest\(", r#"['"]max['"]"#],
    },
    StatisticalRule {
        operation: StatisticalOperation::Min,
        question: &[r"\b(?:min|minimum)\b"],
        code: &[r"\.min\(", r"\.idxmin\(", r"\.nsmallest\(", r#"['"]min['"]"#],
    },
    StatisticalRule {
        operation: StatisticalOperation::Count,
        question: &[r"\bcount\b", r"\bnumber\s+of\b", r"\bhow\s+many\b"],
        code: &[
            r"\.count\(",
            r"\.size\(",
            r"\blen\(",
            r"\.shape\[\s*0\s*\]",
            r"\.value_counts\(",
            r"\.nunique\(",
        ],
    },
    StatisticalRule {
        operation: StatisticalOperation::GroupBy,
        question: &[r"\bgroup(?:ed|s|ing)?\b", r"\bfor\s+each\b", r"\bper\b"],
        code: &[r"\.groupby\(", r"\.pivot_table\("],
    },
];

/// Column references in code: quoted literals and attribute access on a frame
pub const QUOTED_LITERAL: &str = r#"['"]([^'"\n]+)['"]"#;
pub const FRAME_ATTRIBUTE: &str = r"\bdf\w*\.([a-z_][a-z0-9_]*)";

// ---------------------------------------------------------------------------
// Requirement coverage

/// Comparator phrases and the number of conditions each implies. Matched as one
/// leftmost-first alternation, so compound phrases come before their parts.
pub const FILTER_COMPARATORS: &[(&str, usize)] = &[
    (r"\b(?:greater|more|higher|larger|less|fewer|lower|smaller)\s+than\s+or\s+equal(?:\s+to)?\b", 1),
    (r"\bnot\s+equal(?:\s+to)?\b", 1),
    (r"\b(?:greater|more|higher|larger)\s+than\b", 1),
    (r"\b(?:less|fewer|lower|smaller)\s+than\b", 1),
    (r"\babove\b", 1),
    (r"\bbelow\b", 1),
    (r"\bexceed(?:s|ing)?\b", 1),
    (r"\bequal(?:s|\s+to)\b", 1),
    (r"\bat\s+(?:least|most)\b", 1),
    (r"\bcontains?\b", 1),
    (r"\bbetween\b", 2),
];

/// Clause markers that introduce a filter without naming a comparator
pub const FILTER_MARKERS: &[&str] = &[r"\bwhere\b", r"\bfilter(?:ed|s|ing)?\b"];

/// Connectors that join filter conditions
pub const FILTER_CONNECTORS: &str = r"\b(?:and|or)\b";

/// Comparison operators in code; these only count inside a filter expression
pub const CODE_COMPARISONS: &[(&str, usize)] = &[(r">=|<=|==|!=|[<>]", 1)];

/// Comparison methods in code, counted wherever they appear
pub const CODE_COMPARISON_METHODS: &[(&str, usize)] = &[
    (r"\.between\(", 2),
    (r"\.(?:gt|ge|lt|le|eq|ne|isin)\(", 1),
    (r"\.str\.(?:contains|startswith|endswith)\(", 1),
];

/// Group-by markers in questions. A bare `by` only counts when it names several
/// columns or a schema column, and never right after an ordering verb.
pub const GROUP_MARKERS: &str =
    r"\b(?:group(?:ed|ing)?\s+by|broken\s+down\s+by|for\s+each|per|by)\s+";

/// Words that, anywhere before a bare `by`, make it an ordering clause instead
pub const ORDERING_WORDS: &[&str] = &[
    "sort", "sorted", "sorting", "order", "ordered", "ordering", "rank", "ranked", "ranking",
    "top", "bottom", "highest", "lowest", "largest", "smallest",
];

/// Words that end a group-by column list
pub const CLAUSE_TERMINATORS: &[&str] = &[
    "where", "sort", "sorted", "order", "ordered", "then", "having", "with", "show",
    "showing", "top", "bottom", "filter", "filtered", "including", "only", "limit",
    "in", "from", "for", "which", "that", "whose",
];

/// Group-by keys in code
pub const CODE_GROUPBY: &str = r"\.(?:groupby|pivot_table)\(([^)\n]*)\)?";

pub const SORT_KEYWORDS: &str =
    r"\b(?:sort(?:ed|ing)?|order(?:ed|ing)?|ascending|descending|top|bottom|rank(?:ed|ing)?)\b";
pub const SORT_CALLS: &str = r"\.(?:sort_values|sort_index|nlargest|nsmallest|rank)\(|\bsorted\(";

pub const JOIN_KEYWORDS: &str = r"\b(?:join(?:ed|ing)?|merg(?:e|ed|ing)|combin(?:e|ed|ing)|match(?:ed|ing)?)\b";
pub const JOIN_CALLS: &str = r"\.(?:merge|join)\(|\bconcat\(";

// ---------------------------------------------------------------------------
// Error taxonomy

/// Ordered: the first rule with a matching needle wins
pub const ERROR_CATEGORY_RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Column, &["keyerror", "column"]),
    (ErrorCategory::Syntax, &["syntax", "invalid"]),
    (ErrorCategory::Type, &["type", "dtype"]),
    (ErrorCategory::Index, &["index", "out of range"]),
    (ErrorCategory::Attribute, &["attribute", "has no attribute"]),
    (ErrorCategory::Value, &["value"]),
];

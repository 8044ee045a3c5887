use crate::models::EvaluationRecord;
use crate::runner::SessionReport;
use crate::session::{ResummarizeReport, SummaryStatistics};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print session reports in the specified format
pub fn print_results(reports: &[SessionReport], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_plain(reports)),
        OutputFormat::Json => print_json(reports),
    }
}

/// Print the outcome of a resummarize pass
pub fn print_resummarize(report: &ResummarizeReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => println!(
            "Sessions updated: {}, skipped: {}, failed: {}",
            report.updated, report.skipped, report.failed
        ),
        OutputFormat::Json => print_json(report),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

pub fn render_plain(reports: &[SessionReport]) -> String {
    let mut out = String::new();
    for (i, report) in reports.iter().enumerate() {
        let _ = writeln!(out, "=== Session {} ===", report.session_id);
        out.push('\n');

        let _ = writeln!(out, "SUMMARY");
        let _ = writeln!(out, "-------");
        render_summary(&mut out, &report.summary);
        out.push('\n');

        let _ = writeln!(out, "RECORDS");
        let _ = writeln!(out, "-------");
        for (j, record) in report.records.iter().enumerate() {
            let _ = writeln!(out, "Record #{}", j + 1);
            render_record(&mut out, record);
            out.push('\n');
        }

        if i + 1 < reports.len() {
            let _ = writeln!(out, "{}", "=".repeat(50));
            out.push('\n');
        }
    }
    out
}

fn render_summary(out: &mut String, summary: &SummaryStatistics) {
    if summary.total_entries == 0 {
        let _ = writeln!(out, "No records.");
        return;
    }

    let _ = writeln!(out, "Entries: {}", summary.total_entries);
    let _ = writeln!(out, "Models: {}", summary.models_used.join(", "));
    let _ = writeln!(out, "{:<15} {:<8}", "Dimension", "Mean");
    let _ = writeln!(out, "{}", "-".repeat(24));
    for (name, value) in [
        ("overall", summary.average_overall_score),
        ("correctness", summary.average_correctness_score),
        ("quality", summary.average_quality_score),
        ("performance", summary.average_performance_score),
        ("understanding", summary.average_understanding_score),
        ("coverage", summary.average_coverage_score),
        ("recovery", summary.average_recovery_score),
    ] {
        let _ = writeln!(out, "{:<15} {:<8.3}", name, value);
    }
    let _ = writeln!(
        out,
        "Executions: {} succeeded, {} errors, {}/{} recovered ({:.1}%)",
        summary.successful_executions,
        summary.errors_encountered,
        summary.successful_recoveries,
        summary.errors_encountered,
        summary.recovery_success_rate * 100.0
    );
    if let Some(ms) = summary.average_execution_time_ms {
        let _ = writeln!(out, "Average execution time: {:.1} ms", ms);
    }
}

fn render_record(out: &mut String, record: &EvaluationRecord) {
    let _ = writeln!(out, "Model: {}", record.model);
    let _ = writeln!(out, "Question: {}", record.question);
    let _ = writeln!(
        out,
        "Execution: {}",
        if record.execution.success {
            "succeeded".to_string()
        } else {
            format!("failed ({})", record.execution.error_text())
        }
    );
    let _ = writeln!(out, "Scores:");
    let _ = writeln!(out, "  • correctness: {:.3}", record.correctness.correctness_score);
    let _ = writeln!(out, "  • quality: {:.3}", record.quality.quality_score);
    let _ = writeln!(out, "  • performance: {:.3}", record.performance.performance_score);
    match &record.understanding {
        Some(block) => {
            let _ = writeln!(out, "  • understanding: {:.3}", block.understanding_score);
        }
        None => {
            let _ = writeln!(out, "  • understanding: n/a");
        }
    }
    let _ = writeln!(out, "  • coverage: {:.3}", record.coverage.coverage_score);
    if let Some(recovery) = &record.recovery {
        let _ = writeln!(
            out,
            "  • recovery: {:.3} ({} attempts, {:?})",
            recovery.recovery_score,
            recovery.attempts.len(),
            recovery.state
        );
    }
    let _ = writeln!(out, "  • overall: {:.3}", record.overall_score);

    for missing in &record.coverage.missing_requirements {
        let _ = writeln!(out, "Missing: {}", missing.detail);
    }
    for diagnostic in &record.diagnostics {
        let _ = writeln!(out, "Note ({}): {}", diagnostic.dimension, diagnostic.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionOutcome;
    use crate::session::tests::sample_record;

    async fn create_test_reports() -> Vec<SessionReport> {
        let record = sample_record(
            "gpt-4",
            "result = df.groupby('region')['sales'].mean()",
            ExecutionOutcome::succeeded(0.2, None),
        )
        .await;
        let summary = SummaryStatistics::from_records(std::slice::from_ref(&record));
        vec![
            SessionReport {
                session_id: "first".to_string(),
                records: vec![record.clone()],
                summary: summary.clone(),
            },
            SessionReport {
                session_id: "second".to_string(),
                records: vec![record],
                summary,
            },
        ]
    }

    #[tokio::test]
    async fn test_render_plain() {
        let reports = create_test_reports().await;
        let out = render_plain(&reports);

        assert!(out.contains("=== Session first ==="));
        assert!(out.contains("=== Session second ==="));
        assert!(out.contains("Models: gpt-4"));
        assert!(out.contains("• overall:"));
        assert!(out.contains("Question: What is the average sales per region?"));
        assert_eq!(out.matches(&"=".repeat(50)).count(), 1);
    }

    #[test]
    fn test_render_plain_empty_summary() {
        let reports = vec![SessionReport {
            session_id: "empty".to_string(),
            records: vec![],
            summary: SummaryStatistics::default(),
        }];
        assert!(render_plain(&reports).contains("No records."));
    }

    #[tokio::test]
    async fn test_reports_serialize_to_json() {
        let reports = create_test_reports().await;
        let json = serde_json::to_string_pretty(&reports).unwrap();
        assert!(json.contains("\"session_id\": \"first\""));
        assert!(json.contains("\"overall_score\""));
        assert!(json.contains("\"average_overall_score\""));
    }
}

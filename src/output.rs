use colored::Colorize;
use serde::Serialize;

use crate::{
    aggregator::ValidationResults,
    catalog::Keyword,
    schema::{ColumnTypeMap, extract_column_types}
};

/// Output format for a validation report.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Rendering options.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true
        }
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    rule_id:    &'a str,
    ok:         bool,
    skipped:    bool,
    violations: Option<i64>,
    check_type: &'a str,
    message:    &'a str
}

#[derive(Serialize)]
struct Report<'a> {
    rows:         Vec<ReportRow<'a>>,
    passed:       usize,
    failed:       usize,
    skipped:      usize,
    errored:      usize,
    column_types: ColumnTypeMap
}

fn build_report(results: &ValidationResults) -> Report<'_> {
    Report {
        rows: results
            .by_idx
            .iter()
            .map(|v| ReportRow {
                rule_id:    &v.rule_id,
                ok:         v.ok,
                skipped:    v.skipped,
                violations: v.violations,
                check_type: &v.check_type,
                message:    &v.message
            })
            .collect(),
        passed:       results.passed_count(),
        failed:       results.failed_count(),
        skipped:      results.skipped_count(),
        errored:      results.errored_count(),
        column_types: extract_column_types(&results.rules)
    }
}

/// Render a validation report in the requested format.
pub fn format_results(results: &ValidationResults, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&build_report(results)).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&build_report(results)).unwrap_or_default(),
        OutputFormat::Text => format_text_report(results, opts)
    }
}

fn format_text_report(results: &ValidationResults, opts: &OutputOptions) -> String {
    let mut out = String::new();

    let header = "=== FOCUS Conformance Report ===\n\n";
    if opts.colored {
        out.push_str(&header.bold().to_string());
    } else {
        out.push_str(header);
    }

    for verdict in &results.by_idx {
        let rule = results.rules.get(&verdict.rule_id);
        let keyword_label = rule.map(keyword_label).unwrap_or("");

        let status_label = if verdict.skipped {
            "SKIP"
        } else if verdict.ok {
            "PASS"
        } else {
            "FAIL"
        };

        let colored_status = if !opts.colored {
            status_label.to_string()
        } else {
            match status_label {
                "PASS" => status_label.green().to_string(),
                "SKIP" => status_label.yellow().to_string(),
                _ => status_label.red().bold().to_string()
            }
        };

        out.push_str(&format!(
            "[{colored_status}] {} ({keyword_label}) - {}\n",
            verdict.rule_id, verdict.message
        ));
    }

    out.push('\n');
    out.push_str(&format!(
        "passed={} failed={} skipped={} errored={}\n",
        results.passed_count(),
        results.failed_count(),
        results.skipped_count(),
        results.errored_count()
    ));

    let column_types = extract_column_types(&results.rules);
    if !column_types.0.is_empty() {
        out.push_str("\ndeclared column types:\n");
        for (column, logical_type) in &column_types.0 {
            out.push_str(&format!("  {column}: {}\n", logical_type_label(*logical_type)));
        }
    }

    out
}

fn logical_type_label(logical_type: crate::schema::LogicalType) -> &'static str {
    match logical_type {
        crate::schema::LogicalType::String => "string",
        crate::schema::LogicalType::Decimal => "float64",
        crate::schema::LogicalType::DateTime => "datetime-utc"
    }
}

fn keyword_label(rule: &crate::catalog::Rule) -> &'static str {
    match rule.validation_criteria.keyword {
        Keyword::Must => "MUST",
        Keyword::MustNot => "MUST NOT",
        Keyword::Should => "SHOULD",
        Keyword::ShouldNot => "SHOULD NOT",
        Keyword::Recommended => "RECOMMENDED",
        Keyword::NotRecommended => "NOT RECOMMENDED",
        Keyword::May => "MAY",
        Keyword::Optional => "OPTIONAL"
    }
}

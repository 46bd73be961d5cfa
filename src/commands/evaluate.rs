//! Evaluate command - run labeled test cases and report retrieval quality

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Deserialize;

use super::{print_json, truncate, AppContext};
use kgraph_rag::eval::{compare_reports, RegressionKind, TestCase};

/// A test-case file holds either one case or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum TestCaseFile {
    Many(Vec<TestCase>),
    One(TestCase),
}

fn read_cases(path: &Path) -> Result<Vec<TestCase>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: TestCaseFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?,
        _ => serde_yaml::from_str(&text).with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    Ok(match parsed {
        TestCaseFile::Many(cases) => cases,
        TestCaseFile::One(case) => vec![case],
    })
}

/// Expand glob patterns and load every matched file.
pub fn load_test_cases(patterns: &[String]) -> Result<Vec<TestCase>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        for entry in glob::glob(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
            paths.push(entry?);
        }
    }
    paths.sort();
    paths.dedup();

    let mut cases = Vec::new();
    for path in &paths {
        cases.extend(read_cases(path)?);
    }
    Ok(cases)
}

pub async fn run(
    ctx: &AppContext,
    patterns: &[String],
    org: Option<&str>,
    save: bool,
    compare: bool,
    json: bool,
) -> Result<()> {
    let store = ctx.evaluation_store();

    let cases = if patterns.is_empty() {
        store.test_cases()?
    } else {
        let cases = load_test_cases(patterns)?;
        if save {
            for case in &cases {
                store.save_test_case(case)?;
            }
        }
        cases
    };
    if cases.is_empty() {
        bail!("No test cases found (pass files or save some with --save)");
    }

    let baseline = if compare { store.latest_report()? } else { None };
    let report = ctx.evaluator().run_test_suite(&cases, org).await;
    let regressions = baseline
        .as_ref()
        .map(|b| compare_reports(b, &report, ctx.config.evaluation.regression_tolerance))
        .unwrap_or_default();

    if json {
        return print_json(&serde_json::json!({
            "report": report,
            "baseline_id": baseline.as_ref().map(|b| b.id.clone()),
            "regressions": regressions,
        }));
    }

    for result in &report.results {
        let marker = if result.passed { "✓".green() } else { "✗".red() };
        println!(
            "{} [{:.2}] {} {}",
            marker,
            result.overall,
            result.test_case_id.bold(),
            truncate(&result.query, 60).dimmed()
        );
        println!(
            "    coverage {:.2} | relevance {:.2} | accuracy {:.2} | {} ms",
            result.coverage, result.relevance, result.accuracy, result.duration_ms
        );
        if let Some(error) = &result.error {
            println!("    {} {}", "error:".red(), error);
        } else if result.details.missing_total() > 0 {
            let missing: Vec<&str> = result
                .details
                .missing_entities
                .iter()
                .chain(&result.details.missing_relations)
                .chain(&result.details.missing_topics)
                .map(String::as_str)
                .collect();
            println!("    {} {}", "missing:".yellow(), missing.join(", "));
        }
    }

    println!();
    println!(
        "{} {}/{} passed ({:.0}%), average overall {:.2}",
        "→".dimmed(),
        report.passed,
        report.total,
        report.pass_rate() * 100.0,
        report.average_overall
    );

    if let Some(baseline) = &baseline {
        if regressions.is_empty() {
            println!("{} No regressions against {}", "✓".green(), baseline.id.dimmed());
        } else {
            println!("{} {} regressions against {}", "!".yellow().bold(), regressions.len(), baseline.id.dimmed());
            for r in &regressions {
                let what = match r.kind {
                    RegressionKind::NowFailing => "now failing",
                    RegressionKind::ScoreDrop => "score drop",
                };
                println!(
                    "    {} {}: {:.2} → {:.2} ({})",
                    "✗".red(),
                    r.test_case_id,
                    r.baseline_overall,
                    r.current_overall,
                    what
                );
            }
        }
    }

    Ok(())
}

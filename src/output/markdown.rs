//! Markdown crawl report generation
//!
//! Produces a human-readable summary of one crawl job: run information,
//! counters, a depth breakdown and the failed pages.

use crate::jobs::{JobSnapshot, PageResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report for a job to `output_path`
///
/// # Errors
///
/// Returns the I/O error if the file cannot be created or written.
pub fn write_markdown_report(
    snapshot: &JobSnapshot,
    results: &[PageResult],
    output_path: &Path,
) -> std::io::Result<()> {
    let markdown = format_markdown_report(snapshot, results);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl job and its results as markdown
pub fn format_markdown_report(snapshot: &JobSnapshot, results: &[PageResult]) -> String {
    let mut md = String::new();
    let counters = &snapshot.counters;

    md.push_str("# Tidecrawl Crawl Report\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Job ID**: {}\n", snapshot.id));
    md.push_str(&format!("- **Start URL**: {}\n", snapshot.start_url));
    md.push_str(&format!("- **Status**: {}\n", snapshot.status));
    md.push_str(&format!("- **Created**: {}\n", snapshot.created_at.to_rfc3339()));
    if let Some(started) = snapshot.started_at {
        md.push_str(&format!("- **Started**: {}\n", started.to_rfc3339()));
    }
    if let Some(completed) = snapshot.completed_at {
        md.push_str(&format!("- **Finished**: {}\n", completed.to_rfc3339()));
    }
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds\n",
        snapshot.elapsed_seconds
    ));
    if let Some(error) = &snapshot.error {
        md.push_str(&format!("- **Error**: {}\n", error));
    }
    md.push('\n');

    md.push_str("## Overall Statistics\n\n");
    md.push_str("| Counter | Value |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Pages Crawled | {} |\n", counters.pages_crawled));
    md.push_str(&format!("| Successful | {} |\n", counters.pages_successful));
    md.push_str(&format!("| Failed | {} |\n", counters.pages_failed));
    md.push_str(&format!("| URLs Discovered | {} |\n", counters.urls_discovered));
    md.push_str(&format!("| URLs Rejected | {} |\n", counters.urls_rejected));
    md.push_str(&format!("| Deepest Level | {} |\n", counters.current_depth));
    md.push_str(&format!(
        "| Success Rate | {:.2}% |\n\n",
        snapshot.success_rate
    ));

    if !results.is_empty() {
        let mut depths: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        for result in results {
            let entry = depths.entry(result.depth()).or_default();
            entry.0 += 1;
            if !result.success {
                entry.1 += 1;
            }
        }

        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages | Failed |\n");
        md.push_str("|-------|-------|--------|\n");
        for (depth, (pages, failed)) in depths {
            md.push_str(&format!("| {} | {} | {} |\n", depth, pages, failed));
        }
        md.push('\n');
    }

    let failures: Vec<&PageResult> = results.iter().filter(|r| !r.success).collect();
    if !failures.is_empty() {
        md.push_str("## Failed Pages\n\n");
        md.push_str("| URL | Status | Error |\n");
        md.push_str("|-----|--------|-------|\n");
        for result in failures {
            let status = result
                .status_code()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            let error = result
                .error
                .as_ref()
                .map(|e| e.message.replace('|', "\\|"))
                .unwrap_or_default();
            md.push_str(&format!("| {} | {} | {} |\n", result.url, status, error));
        }
        md.push('\n');
    }

    md.push_str("---\n\n");
    md.push_str(&format!(
        "*Generated by tidecrawl v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    md
}

//! Report assembly and plain-text rendering.

use crate::inspector::{for_each_object, BucketInspector, ReportError};
use crate::lifecycle::LifecycleReport;
use crate::stats::{format_size, BucketStats, StatsAccumulator};
use std::fmt::Write;

const RULE: &str =
    "======================================================================";
const THIN_RULE: &str =
    "----------------------------------------------------------------------";

#[derive(Debug, Clone, PartialEq)]
pub struct BucketReport {
    /// `s3://bucket/prefix`
    pub destination: String,
    pub stats: BucketStats,
    pub lifecycle: LifecycleReport,
}

/// List the whole prefix, then look up lifecycle rules.
///
/// Listing errors fail the report; lifecycle problems end up inside it.
pub async fn gather(
    inspector: &dyn BucketInspector,
    destination: impl Into<String>,
) -> Result<BucketReport, ReportError> {
    let mut acc = StatsAccumulator::default();
    for_each_object(inspector, |object| acc.add(object)).await?;
    let stats = acc.finish();

    let lifecycle = inspector.lifecycle().await;

    Ok(BucketReport {
        destination: destination.into(),
        stats,
        lifecycle,
    })
}

pub fn render(report: &BucketReport) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &BucketReport) -> std::fmt::Result {
    let stats = &report.stats;

    writeln!(out, "{}", RULE)?;
    writeln!(out, "BUCKET STATISTICS")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Bucket:        {}", report.destination)?;
    writeln!(out, "Total Files:   {}", group_thousands(stats.total_files))?;
    writeln!(
        out,
        "Total Size:    {} ({} bytes)",
        format_size(stats.total_bytes as f64),
        group_thousands(stats.total_bytes)
    )?;
    writeln!(out)?;

    match (&stats.oldest, &stats.newest) {
        (Some(oldest), Some(newest)) => {
            writeln!(out, "{}", RULE)?;
            writeln!(out, "DATE RANGE")?;
            writeln!(out, "{}", RULE)?;
            writeln!(
                out,
                "Oldest File:   {}",
                oldest.last_modified.format("%Y-%m-%d %H:%M:%S")
            )?;
            writeln!(out, "               {}", oldest.file_name())?;
            writeln!(
                out,
                "Newest File:   {}",
                newest.last_modified.format("%Y-%m-%d %H:%M:%S")
            )?;
            writeln!(out, "               {}", newest.file_name())?;
            writeln!(out, "Data Span:     {} days", stats.span_days)?;
            writeln!(out)?;

            writeln!(out, "{}", RULE)?;
            writeln!(out, "BREAKDOWN BY FILE TYPE")?;
            writeln!(out, "{}", RULE)?;
            writeln!(
                out,
                "{:<12} {:>10} {:>15} {:>12}",
                "Extension", "Files", "Size", "% of Total"
            )?;
            writeln!(out, "{}", THIN_RULE)?;
            for ext in &stats.extensions {
                writeln!(
                    out,
                    "{:<12} {:>10} {:>15} {:>11.1}%",
                    ext.extension,
                    group_thousands(ext.count),
                    format_size(ext.bytes as f64),
                    ext.share
                )?;
            }
            writeln!(out)?;

            if let Some(growth) = &stats.growth {
                writeln!(out, "{}", RULE)?;
                writeln!(out, "STORAGE RATE")?;
                writeln!(out, "{}", RULE)?;
                writeln!(out, "Average:       {}/day", format_size(growth.bytes_per_day))?;
                writeln!(out, "Projected:     {}/month", format_size(growth.bytes_per_month))?;
                writeln!(out, "Projected:     {}/year", format_size(growth.bytes_per_year))?;
            }
        }
        _ => writeln!(out, "No files found in bucket with specified prefix.")?,
    }
    writeln!(out, "{}", RULE)?;

    writeln!(out)?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "LIFECYCLE POLICY CHECK")?;
    writeln!(out, "{}", RULE)?;
    match &report.lifecycle {
        LifecycleReport::Configured(rules) => {
            writeln!(out, "Lifecycle policies are configured ({} rule(s))", rules.len())?;
            writeln!(out)?;
            for (i, rule) in rules.iter().enumerate() {
                writeln!(out, "Rule {}: {}", i + 1, rule.id.as_deref().unwrap_or("Unnamed"))?;
                writeln!(out, "  Status: {}", rule.status)?;
                if let Some(prefix) = &rule.filter_prefix {
                    writeln!(out, "  Applies to: {}", prefix)?;
                }
                if let Some(days) = rule.expiration_days {
                    writeln!(out, "  Delete after: {} days", days)?;
                }
                if let Some(date) = &rule.expiration_date {
                    writeln!(out, "  Delete on: {}", date)?;
                }
                for transition in &rule.transitions {
                    writeln!(
                        out,
                        "  Transition to {} after: {} days",
                        transition.storage_class.as_deref().unwrap_or("Unknown"),
                        transition
                            .days
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    )?;
                }
                writeln!(out)?;
            }
        }
        LifecycleReport::NotConfigured => {
            writeln!(out, "No lifecycle policies configured")?;
        }
        LifecycleReport::Unavailable(reason) => {
            writeln!(out, "Unable to check lifecycle policy: {}", reason)?;
        }
    }
    writeln!(out, "{}", RULE)?;

    Ok(())
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

//! Sweep Command
//!
//! Remove job state idle past the retention window.
//!
//! Usage:
//!   cadmotion sweep [--dry-run]     one pass, then exit
//!   cadmotion sweep --watch         run periodically until Ctrl-C

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::cli::ui::Output;
use crate::cli::util::{OutputFormat, open_store, print_json};
use crate::config::Config;
use crate::pipeline::{RetentionSweeper, SweepReport};
use crate::types::Result;

pub async fn run(config: &Config, dry_run: bool, format: OutputFormat) -> Result<()> {
    let report = sweeper(config).dry_run(dry_run).sweep_once().await?;

    match format {
        OutputFormat::Json => print_json(&report_json(&report, dry_run)),
        OutputFormat::Text => {
            print_report(&report, dry_run);
            Ok(())
        }
    }
}

/// Sweep on the configured interval until interrupted
pub async fn watch(config: &Config) -> Result<()> {
    let (shutdown, rx) = watch::channel(false);
    let handle = Arc::new(sweeper(config)).spawn(rx);

    info!(
        interval_secs = config.retention.sweep_interval_secs,
        "Retention sweeper running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    let _ = shutdown.send(true);
    let _ = handle.await;
    Output::new().info("Retention sweeper stopped");
    Ok(())
}

fn sweeper(config: &Config) -> RetentionSweeper {
    RetentionSweeper::new(
        open_store(config),
        config.retention.window(),
        config.retention.sweep_interval(),
    )
}

fn report_json(report: &SweepReport, dry_run: bool) -> serde_json::Value {
    serde_json::json!({
        "dry_run": dry_run,
        "removed": report.removed,
        "retained": report.retained,
        "unreadable": report.unreadable,
        "failed": report.failed,
    })
}

fn print_report(report: &SweepReport, dry_run: bool) {
    let output = Output::new();
    let verb = if dry_run { "Would remove" } else { "Removed" };

    output.success(&format!("{} {} job(s)", verb, report.removed.len()));
    for job_id in &report.removed {
        println!("    {}", job_id);
    }
    output.field("Retained", report.retained);
    if !report.unreadable.is_empty() {
        output.warning(&format!(
            "{} unreadable record(s) treated as expired",
            report.unreadable.len()
        ));
    }
    for job_id in &report.failed {
        output.error(&format!("Could not remove {}", job_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_shape() {
        let report = SweepReport {
            removed: vec!["a".to_string()],
            retained: 2,
            unreadable: vec![],
            failed: vec!["b".to_string()],
        };
        let json = report_json(&report, true);
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["removed"][0], "a");
        assert_eq!(json["retained"], 2);
        assert_eq!(json["failed"][0], "b");
    }
}

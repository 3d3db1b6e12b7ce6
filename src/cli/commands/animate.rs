//! Animate Command
//!
//! Generate a disassembly animation script for a completed job.
//!
//! Usage:
//!   cadmotion animate <job-id> [-f json] [-o script.json]

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::types::{AnimationAction, Result};

pub async fn run(
    ctx: &CommandContext,
    job_id: &str,
    format: OutputFormat,
    out: Option<&Path>,
) -> Result<()> {
    let commands = ctx.service.animate(job_id).await?;
    let output = Output::new();

    if let Some(path) = out {
        tokio::fs::write(path, serde_json::to_vec_pretty(&commands)?).await?;
        output.success(&format!(
            "Wrote {} commands to {}",
            commands.len(),
            path.display()
        ));
        return Ok(());
    }

    if format == OutputFormat::Json {
        return print_json(&commands);
    }

    output.header(&format!("Animation for job {} ({} steps)", job_id, commands.len()));
    for (i, cmd) in commands.iter().enumerate() {
        let detail = match &cmd.action {
            AnimationAction::Translate { x, y, z } => format!("by ({}, {}, {})", x, y, z),
            AnimationAction::Rotate { axis, angle } => {
                format!("{}° about ({}, {}, {})", angle, axis[0], axis[1], axis[2])
            }
            AnimationAction::Scale { factor } => format!("x{}", factor),
        };
        println!("{:>3}. {:<9} {} {}", i + 1, cmd.action.kind(), cmd.target, detail);
    }

    Ok(())
}

//! Submit Command
//!
//! Stage an archive, start its run and follow progress until it finishes.
//!
//! Usage:
//!   cadmotion submit <archive.zip> [-f json]
//!
//! The run lives inside this process, so the command always waits for a
//! terminal state before exiting.

use std::path::Path;
use std::time::Duration;

use crate::cli::progress::{ConsoleRenderer, status_label};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::types::{CadError, Result, SessionStatus};

const REFRESH: Duration = Duration::from_millis(250);

pub async fn run(ctx: &CommandContext, archive: &Path, format: OutputFormat) -> Result<()> {
    let bytes = tokio::fs::read(archive).await.map_err(|e| {
        CadError::InvalidArchive(format!("cannot read {}: {}", archive.display(), e))
    })?;

    let output = Output::new();
    let submission = ctx.service.submit(bytes).await?;
    if format == OutputFormat::Text {
        output.info(&format!("Submitted job {}", submission.job_id));
    }

    let renderer = ConsoleRenderer::new().with_spinner(format == OutputFormat::Text);
    let session = renderer
        .follow(&ctx.service, &submission.job_id, submission.handle, REFRESH)
        .await?;

    if format == OutputFormat::Json {
        print_json(&session)?;
    } else if session.status == SessionStatus::Completed {
        output.success(&format!(
            "Job {} {}",
            session.job_id,
            status_label(session.status)
        ));
        if let Some(result) = &session.result {
            output.field("Assembly", &result.root_filename);
            output.field("URN", &result.urn);
            output.field("View", &result.model_guid);
        }
        output.info(&format!(
            "Run 'cadmotion animate {}' to generate an animation",
            session.job_id
        ));
    }

    match session.status {
        SessionStatus::Completed => Ok(()),
        _ => Err(CadError::JobFailed {
            job_id: session.job_id,
            error: session.error.unwrap_or_else(|| session.message.clone()),
        }),
    }
}

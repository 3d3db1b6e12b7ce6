//! Token Command
//!
//! Issue a read-only viewer token for a job's translated model.

use serde_json::json;

use crate::cli::util::{CommandContext, OutputFormat, print_json};
use crate::types::Result;

pub async fn run(ctx: &CommandContext, job_id: &str, format: OutputFormat) -> Result<()> {
    let token = ctx.service.viewer_token(job_id).await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "access_token": token.secret(),
            "expires_in": token.expires_in,
        })),
        OutputFormat::Text => {
            // Bare token on stdout so it can be piped
            println!("{}", token.secret());
            Ok(())
        }
    }
}

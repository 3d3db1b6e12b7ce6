//! Status Command
//!
//! Display a job's session record. Reads the data directory directly, so no
//! service credentials are needed.

use crate::cli::progress::status_label;
use crate::cli::ui::Output;
use crate::cli::util::{OutputFormat, open_store, print_json};
use crate::config::Config;
use crate::types::{CadError, Result, validate_job_id};

pub async fn run(config: &Config, job_id: &str, format: OutputFormat) -> Result<()> {
    validate_job_id(job_id)?;
    let store = open_store(config);
    let session = store
        .get(job_id)
        .await?
        .ok_or_else(|| CadError::SessionNotFound(job_id.to_string()))?;

    if format == OutputFormat::Json {
        return print_json(&session);
    }

    let output = Output::new();
    output.header(&format!("Job {}", session.job_id));
    output.field("Status", status_label(session.status));
    output.field("Progress", format!("{}%", session.progress));
    output.field("Message", &session.message);
    if let Some(error) = &session.error {
        output.field("Error", error);
    }
    if let Some(result) = &session.result {
        output.field("Assembly", &result.root_filename);
        output.field("Bucket", &result.bucket_key);
        output.field("URN", &result.urn);
        output.field("View", &result.model_guid);
    }
    output.field("Created", session.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    output.field("Updated", session.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(())
}

//! Call Timeouts
//!
//! Every outbound remote call runs under a deadline so a hung dependency
//! stalls only the job that issued it.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::remote::timeout::with_timeout;
//!
//! let token = with_timeout(
//!     Stage::Authenticate,
//!     Duration::from_secs(30),
//!     service.acquire_token(TokenScope::Internal),
//! )
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::pipeline::Stage;
use crate::types::{CadError, RemoteStageError, Result};

/// Execute a remote call with a timeout
///
/// Expiry is reported as a stage-scoped remote error without an HTTP status,
/// which classifies as transient.
pub async fn with_timeout<T, F>(stage: Stage, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CadError::RemoteStage(RemoteStageError::new(
            stage,
            format!("call timed out after {:?}", timeout),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Stage::Authenticate, Duration::from_secs(1), async {
            Ok::<_, CadError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Stage::FetchMetadata, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, CadError>(42)
        })
        .await;
        match result {
            Err(CadError::RemoteStage(err)) => {
                assert_eq!(err.stage, Stage::FetchMetadata);
                assert!(err.is_transient());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

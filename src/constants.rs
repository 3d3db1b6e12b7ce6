//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Session storage layout
pub mod storage {
    /// Default data directory (relative to the working directory)
    pub const DEFAULT_DATA_DIR: &str = ".cadmotion/jobs";

    /// Session record file name inside a job directory
    pub const SESSION_FILE: &str = "session.json";

    /// Staged upload directory name inside a job directory
    pub const UPLOAD_DIR: &str = "upload";

    /// Persisted object hierarchy artifact
    pub const HIERARCHY_FILE: &str = "hierarchy.json";

    /// Persisted component properties artifact
    pub const PROPERTIES_FILE: &str = "properties.json";
}

/// Archive staging limits
pub mod staging {
    /// Maximum accepted archive size (512MB)
    pub const MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

    /// Maximum total size of extracted files (2GB)
    pub const MAX_UNCOMPRESSED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

    /// Maximum number of entries in an archive
    pub const MAX_ENTRIES: usize = 10_000;

    /// Default primary assembly extension (Inventor assembly)
    pub const DEFAULT_ASSEMBLY_EXTENSION: &str = "iam";
}

/// Polling policy defaults
pub mod polling {
    /// Delay between status checks (seconds)
    pub const INTERVAL_SECS: u64 = 5;

    /// Maximum wait for translation to finish (seconds)
    pub const TRANSLATION_BUDGET_SECS: u64 = 20 * 60;

    /// Maximum wait for hierarchy/properties to become available (seconds)
    pub const AVAILABILITY_BUDGET_SECS: u64 = 5 * 60;

    /// Early attempts where "not found" counts as not-yet-ready
    pub const NOT_FOUND_GRACE_ATTEMPTS: u32 = 3;
}

/// Retention sweeper defaults
pub mod retention {
    /// Records idle longer than this are expired (seconds, 24h)
    pub const WINDOW_SECS: u64 = 24 * 60 * 60;

    /// Sweep period (seconds)
    pub const SWEEP_INTERVAL_SECS: u64 = 60 * 60;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Maximum retries for transient request failures
    pub const MAX_NETWORK_RETRIES: usize = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Files uploaded concurrently within one job
    pub const UPLOAD_CONCURRENCY: usize = 4;
}

/// Animation generation limits
pub mod generation {
    /// Maximum characters of hierarchy JSON embedded in a prompt
    pub const MAX_HIERARCHY_CHARS: usize = 24_000;

    /// Maximum characters of property JSON embedded in a prompt
    pub const MAX_PROPERTIES_CHARS: usize = 24_000;

    /// Default request timeout (seconds)
    pub const TIMEOUT_SECS: u64 = 300;
}

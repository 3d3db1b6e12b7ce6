//! Pipeline Stages
//!
//! Ordered stage list for a translation run, with the progress checkpoint each
//! stage reaches on success. Two extra stages tag remote calls made outside the
//! run (animation generation, viewer tokens) so their errors carry a stage too.

use serde::{Deserialize, Serialize};

/// Stage identifier
///
/// Pipeline stages are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Authenticate,
    CreateStorage,
    Upload,
    DetectAssembly,
    LinkReferences,
    SubmitTranslation,
    AwaitTranslation,
    FetchMetadata,
    FetchHierarchy,
    FetchProperties,
    /// On-demand animation request
    Generate,
    /// On-demand viewer credential
    ViewerToken,
}

impl Stage {
    /// Stages of a translation run, in order
    pub const PIPELINE: [Stage; 10] = [
        Stage::Authenticate,
        Stage::CreateStorage,
        Stage::Upload,
        Stage::DetectAssembly,
        Stage::LinkReferences,
        Stage::SubmitTranslation,
        Stage::AwaitTranslation,
        Stage::FetchMetadata,
        Stage::FetchHierarchy,
        Stage::FetchProperties,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate => "credential acquisition",
            Self::CreateStorage => "storage creation",
            Self::Upload => "file upload",
            Self::DetectAssembly => "assembly detection",
            Self::LinkReferences => "reference linking",
            Self::SubmitTranslation => "translation submission",
            Self::AwaitTranslation => "translation",
            Self::FetchMetadata => "metadata retrieval",
            Self::FetchHierarchy => "hierarchy retrieval",
            Self::FetchProperties => "property retrieval",
            Self::Generate => "animation generation",
            Self::ViewerToken => "viewer token issuance",
        }
    }

    /// Message shown while the stage runs
    pub fn running_message(&self) -> &'static str {
        match self {
            Self::Authenticate => "Acquiring access token",
            Self::CreateStorage => "Creating storage bucket",
            Self::Upload => "Uploading files",
            Self::DetectAssembly => "Locating primary assembly",
            Self::LinkReferences => "Linking assembly references",
            Self::SubmitTranslation => "Submitting translation job",
            Self::AwaitTranslation => "Waiting for translation",
            Self::FetchMetadata => "Fetching model metadata",
            Self::FetchHierarchy => "Fetching object hierarchy",
            Self::FetchProperties => "Fetching component properties",
            Self::Generate => "Generating animation",
            Self::ViewerToken => "Issuing viewer token",
        }
    }

    /// Progress reached when the stage succeeds.
    ///
    /// Zero for stages outside the translation run.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Self::Authenticate => 5,
            Self::CreateStorage => 10,
            Self::Upload => 25,
            Self::DetectAssembly => 30,
            Self::LinkReferences => 40,
            Self::SubmitTranslation => 50,
            Self::AwaitTranslation => 65,
            Self::FetchMetadata => 80,
            Self::FetchHierarchy => 85,
            Self::FetchProperties => 95,
            Self::Generate | Self::ViewerToken => 0,
        }
    }

    /// Progress band `(floor, ceiling)` that intermediate events within this
    /// stage are mapped into. The floor is the previous stage's checkpoint.
    pub fn band(&self) -> (u8, u8) {
        let floor = Self::PIPELINE
            .iter()
            .position(|s| s == self)
            .and_then(|idx| idx.checked_sub(1))
            .map(|prev| Self::PIPELINE[prev].checkpoint())
            .unwrap_or(0);
        (floor, self.checkpoint())
    }

    /// Map a 0-100 fraction of this stage's work onto the overall progress
    /// scale, staying strictly below the stage's own checkpoint.
    pub fn scaled(&self, percent: u8) -> u8 {
        let (floor, ceiling) = self.band();
        if ceiling <= floor {
            return floor;
        }
        let span = u32::from(ceiling - floor);
        let offset = (span * u32::from(percent.min(100)) / 100).min(span.saturating_sub(1));
        floor + offset as u8
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

//! Errors that abort a publication run.

use ferry_registry::RegistryError;

/// A condition that prevents the run from publishing anything further.
///
/// Per-artifact upload failures are not represented here; they are recorded
/// in the run's results and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// `origin` names where the version was read from: a manifest path or
    /// the literal input.
    #[error("cannot determine the release version from {origin}: {reason}")]
    MetadataParse { origin: String, reason: String },

    #[error("builder produced output for unknown target {triple:?}")]
    UnknownTarget { triple: String },

    #[error("target {triple}: expected builder output {expected:?}, found {actual:?}")]
    RawNameMismatch {
        triple: String,
        expected: String,
        actual: String,
    },

    #[error("target {triple}: missing artifact {expected:?}")]
    MissingArtifact { triple: String, expected: String },

    #[error("target {triple}: more than one artifact found ({})", .names.join(", "))]
    AmbiguousArtifact { triple: String, names: Vec<String> },

    #[error("canonical name {name:?} is used by both {first} and {second}")]
    DuplicateCanonicalName {
        name: String,
        first: String,
        second: String,
    },

    #[error("target {triple} is listed more than once")]
    DuplicateTarget { triple: String },

    #[error("release registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("artifact transfer: {0:#}")]
    Transfer(anyhow::Error),

    #[error("cancelled before {stage}")]
    Cancelled { stage: &'static str },

    /// Configuration, credentials or repository settings rejected before
    /// the run started.
    #[error("setup failed: {reason}")]
    Setup { reason: String },
}

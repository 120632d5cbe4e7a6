//! Core domain types for ferry.
//!
//! These types are shared by the registry client, the configuration loader,
//! the event log and the publication orchestrator.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ferry_retry::ErrorClass;

/// Current receipt schema identifier.
pub const RECEIPT_VERSION: &str = "ferry.receipt.v1";

/// A resolved release version, e.g. `1.4.0`. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wrap an already-validated semantic version string.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The release tag for this version: `"v" + version`.
    pub fn tag(&self) -> Tag {
        Tag(format!("v{}", self.0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The registry's version-qualified release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One supported compilation target and how its output is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Target triple, e.g. `x86_64-pc-windows-msvc`.
    pub triple: String,
    /// Human-readable label, e.g. `windows-x64`.
    pub display_name: String,
    /// Filename the builder produces for this target, e.g. `app.exe`.
    pub raw_name: String,
    /// Flat, OS-agnostic published name, e.g. `app-windows-x64.exe`.
    pub canonical_name: String,
}

impl BuildTarget {
    /// Name under which the artifact transfer layer stores this target's output.
    pub fn transfer_key(&self) -> String {
        format!("{}/{}", self.triple, self.raw_name)
    }
}

/// The configured build matrix. Order is the order targets are reported in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetTable(Vec<BuildTarget>);

impl TargetTable {
    pub fn new(targets: Vec<BuildTarget>) -> Self {
        Self(targets)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildTarget> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn find(&self, triple: &str) -> Option<&BuildTarget> {
        self.0.iter().find(|t| t.triple == triple)
    }
}

impl<'a> IntoIterator for &'a TargetTable {
    type Item = &'a BuildTarget;
    type IntoIter = std::slice::Iter<'a, BuildTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An artifact attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// A remote release record as observed through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag: Tag,
    pub title: String,
    pub notes: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Where the release registry lives and how long a single request may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// `owner/name` of the repository owning the releases.
    pub repository: String,
    /// Base URL for the REST API, e.g. `https://api.github.com`.
    pub api_base: String,
    /// Base URL for asset uploads, e.g. `https://uploads.github.com`.
    pub upload_base: String,
    /// Upper bound on a single request, connect through body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Opaque credential passed to the registry. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw secret. Only the HTTP layer should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Externally raised stop signal. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-artifact upload state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded,
    Failed { class: ErrorClass, message: String },
    Skipped { reason: String },
}

impl UploadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed { .. } => "failed",
            UploadStatus::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of publishing one target's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub target: String,
    pub display_name: String,
    pub canonical_name: String,
    pub status: UploadStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl UploadResult {
    /// A result for a target that was never attempted.
    pub fn skipped(target: &BuildTarget, reason: impl Into<String>) -> Self {
        Self {
            target: target.triple.clone(),
            display_name: target.display_name.clone(),
            canonical_name: target.canonical_name.clone(),
            status: UploadStatus::Skipped {
                reason: reason.into(),
            },
            attempts: 0,
            size: None,
            sha256: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == UploadStatus::Uploaded
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            UploadStatus::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Terminal state of a publication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialFailure,
    FatalFailure,
}

impl Outcome {
    /// Process exit code: 0 on success, 3 when some artifacts are missing,
    /// 4 when nothing usable was published.
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::PartialFailure => 3,
            Outcome::FatalFailure => 4,
        }
    }

    /// Classify a finished upload loop.
    pub fn from_results(results: &[UploadResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        if !results.is_empty() && succeeded == results.len() {
            Outcome::Success
        } else if succeeded > 0 {
            Outcome::PartialFailure
        } else {
            Outcome::FatalFailure
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "SUCCESS",
            Outcome::PartialFailure => "PARTIAL_FAILURE",
            Outcome::FatalFailure => "FATAL_FAILURE",
        };
        f.write_str(s)
    }
}

/// Event types recorded in the JSONL event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    RunStarted { target_count: usize },
    VersionResolved { version: String, tag: String },
    ArtifactsMapped { count: usize },
    ReleaseChecked { exists: bool },
    ReleaseCreated { title: String },
    /// Another run created the release between our check and our create.
    ReleaseCreateRaced,
    UploadStarted { canonical_name: String, size: u64 },
    UploadSucceeded { canonical_name: String, attempts: u32 },
    UploadFailed { canonical_name: String, class: ErrorClass, message: String },
    UploadSkipped { canonical_name: String, reason: String },
    Cancelled,
    Fatal { message: String },
    RunFinished { outcome: Outcome },
}

/// A single event in the publication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event_type: EventType,
    /// Target triple this event relates to, or `"all"` for run-level events.
    pub target: String,
}

/// Durable summary of a publication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Tag>,
    pub repository: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub release_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<UploadResult>,
}

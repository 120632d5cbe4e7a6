//! Release registry client for ferry.
//!
//! The registry holds one release record per tag and a set of named
//! artifacts attached to each release. This crate exposes the three
//! operations the publication orchestrator needs behind the
//! [`ReleaseRegistry`] trait, and an HTTP implementation speaking the
//! GitHub releases REST API.
//!
//! Transient failures (timeouts, connection errors, 5xx, 429) are retried
//! inside the client with bounded backoff and never surface individually.
//! Permanent failures (other 4xx, empty content) are returned immediately.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ferry_registry::{HttpReleaseRegistry, ReleaseRegistry};
//! use ferry_types::{AuthToken, RegistrySettings, Version};
//!
//! let settings = RegistrySettings {
//!     repository: "acme/app".to_string(),
//!     api_base: "https://api.github.com".to_string(),
//!     upload_base: "https://uploads.github.com".to_string(),
//!     timeout: Duration::from_secs(30),
//! };
//! let client = HttpReleaseRegistry::new(settings, AuthToken::new("token")).unwrap();
//! let tag = Version::new_unchecked("1.0.0").tag();
//! if !client.exists(&tag).unwrap() {
//!     client.create(&tag, "Release v1.0.0", "notes").unwrap();
//! }
//! ```

use ferry_retry::{Classify, ErrorClass};
use ferry_types::{Release, ReleaseAsset, Tag};

mod http;

pub use http::{HttpReleaseRegistry, USER_AGENT};

/// Errors surfaced by a release registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A single failed attempt that may succeed if repeated. Converted to
    /// [`RegistryError::Unavailable`] once retries are exhausted.
    #[error("{operation}: transient failure: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: registry unavailable after {attempts} attempt(s): {message}")]
    Unavailable {
        operation: &'static str,
        attempts: u32,
        message: String,
    },
    #[error("release {tag} already exists")]
    AlreadyExists { tag: Tag },
    #[error("release {tag} not found")]
    ReleaseNotFound { tag: Tag },
    #[error("{operation}: rejected with status {status}: {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },
    #[error("{operation}: authentication failed (status {status}); check the release token")]
    Unauthorized { operation: &'static str, status: u16 },
    #[error("refusing to upload empty content for {name}")]
    EmptyContent { name: String },
    #[error("{operation}: cancelled before completion")]
    Cancelled { operation: &'static str },
    /// An upload stopped by cancellation after at least one attempt reached
    /// the registry. `removed_previous` is set when an attempt deleted the
    /// asset being replaced, so the release no longer carries `name`.
    #[error(
        "upload of {name} cancelled after {attempts} attempt(s){}",
        removed_note(.removed_previous)
    )]
    Interrupted {
        name: String,
        attempts: u32,
        removed_previous: bool,
    },
}

fn removed_note(removed_previous: &bool) -> &'static str {
    if *removed_previous {
        "; previous asset removed"
    } else {
        ""
    }
}

impl Classify for RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Transient { .. }
            | RegistryError::Unavailable { .. }
            | RegistryError::Interrupted { .. } => ErrorClass::Retryable,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Remote store of releases keyed by tag.
///
/// Implementations must make [`ReleaseRegistry::upload`] overwrite-safe:
/// uploading the same name twice leaves exactly one asset with the latest
/// content. [`ReleaseRegistry::create`] is not create-if-absent; callers
/// check [`ReleaseRegistry::exists`] first and tolerate
/// [`RegistryError::AlreadyExists`] when racing another writer.
pub trait ReleaseRegistry {
    /// Whether a release exists for `tag`. A definitive "not found" is `Ok(false)`.
    fn exists(&self, tag: &Tag) -> Result<bool, RegistryError>;

    /// Create a release for `tag`. Fails with `AlreadyExists` if one is present.
    fn create(&self, tag: &Tag, title: &str, notes: &str) -> Result<Release, RegistryError>;

    /// Attach `content` as `name` on the release for `tag`, replacing any
    /// asset already attached under that name.
    ///
    /// A cancellation noticed before any request is `Cancelled`; one noticed
    /// after an attempt reached the registry is `Interrupted`.
    fn upload(&self, tag: &Tag, name: &str, content: &[u8]) -> Result<Uploaded, RegistryError>;
}

/// Asset attached by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub asset: ReleaseAsset,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Whether an existing asset with the same name was replaced.
    pub replaced: bool,
}

//! # Ferry
//!
//! Idempotent publication of cross-compiled binaries to a versioned release.
//!
//! Ferry takes the artifacts a build matrix produced, renames each one to a
//! stable per-platform name, and attaches them to the release for the
//! project's current version. It is safe to re-run: a release created by a
//! concurrent run is adopted, and re-uploading an artifact replaces it.
//!
//! ## Pipeline
//!
//! 1. [`version::VersionResolver`] reads the version from `Cargo.toml`; the tag
//!    is `"v" + version`.
//! 2. [`artifacts::collect_artifacts`] lists the artifact store and uses
//!    [`mapper::ArtifactNameMapper`] to map each target's output to its
//!    canonical name. Missing or unexpected output is fatal here, before any
//!    registry call.
//! 3. [`engine::run_publish`] ensures the release exists, then uploads every
//!    artifact, continuing past individual failures.
//!
//! The run ends in one of three [`ferry_types::Outcome`]s: `SUCCESS`,
//! `PARTIAL_FAILURE` (exit code 3) or `FATAL_FAILURE` (exit code 4).
//!
//! ## Example
//!
//! ```ignore
//! use ferry::artifacts::DirArtifactStore;
//! use ferry::engine::{PublishContext, run_publish};
//!
//! let store = DirArtifactStore::new("artifacts");
//! let ctx = PublishContext { /* ... */ };
//! let report = run_publish(&ctx, &mut reporter);
//! for line in report.summary_lines() {
//!     println!("{line}");
//! }
//! std::process::exit(report.exit_code());
//! ```

pub mod artifacts;
pub mod auth;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod receipt;
pub mod version;

pub use error::PublishError;

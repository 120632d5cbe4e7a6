//! Artifact transfer between build jobs and the publication job.
//!
//! Build jobs store their output under `<triple>/<raw_name>`. The publication
//! job lists the store, checks every configured target produced exactly one
//! artifact, and maps it to its canonical name.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use ferry_types::BuildTarget;
use sha2::{Digest, Sha256};

use crate::error::PublishError;
use crate::mapper::ArtifactNameMapper;

/// Named blob storage shared by build jobs and the publication job.
pub trait ArtifactStore: Send + Sync {
    /// Store `content` under `name`, replacing any previous content.
    fn put(&self, name: &str, content: &[u8]) -> Result<()>;

    /// Content stored under `name`, or `None` if absent.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// All stored names, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// Artifact store backed by a local directory, e.g. a downloaded CI artifact.
#[derive(Debug, Clone)]
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl ArtifactStore for DirArtifactStore {
    fn put(&self, name: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(name)?;
        let parent = full_path
            .parent()
            .with_context(|| format!("artifact path has no parent: {}", full_path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;

        // Hidden so a concurrent list never sees a half-written artifact.
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp_path = parent.join(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &full_path)
            .with_context(|| format!("failed to rename file to: {}", full_path.display()))?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let full_path = self.full_path(name)?;
        match fs::read(&full_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read file: {}", full_path.display()))
            }
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut results = Vec::new();
        if !self.root.is_dir() {
            return Ok(results);
        }

        fn collect_files(dir: &Path, base: &Path, results: &mut Vec<String>) -> Result<()> {
            let entries = fs::read_dir(dir)
                .with_context(|| format!("failed to list directory: {}", dir.display()))?;
            for entry in entries {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if path.is_dir() {
                    collect_files(&path, base, results)?;
                } else if let Ok(relative) = path.strip_prefix(base)
                    && let Some(s) = relative.to_str()
                {
                    results.push(s.replace('\\', "/"));
                }
            }
            Ok(())
        }

        collect_files(&self.root, &self.root, &mut results)?;
        results.sort();
        Ok(results)
    }
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, name: &str, content: &[u8]) -> Result<()> {
        validate_name(name)?;
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact store lock poisoned"))?;
        blobs.insert(name.to_string(), content.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact store lock poisoned"))?;
        Ok(blobs.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<String>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact store lock poisoned"))?;
        Ok(blobs.keys().cloned().collect())
    }
}

/// Reject names that could escape the store root.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("artifact name is empty");
    }
    if name.contains('\\') {
        bail!("artifact name {name:?} must use '/' separators");
    }
    if Path::new(name).is_absolute()
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        bail!("artifact name {name:?} must be a relative path without '.' or '..'");
    }
    Ok(())
}

/// One target's builder output, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedArtifact {
    pub target: BuildTarget,
    /// Name in the artifact store.
    pub source: String,
    pub canonical_name: String,
    pub content: Vec<u8>,
}

impl MappedArtifact {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Hex-encoded SHA-256 of the content.
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }
}

/// Collect and map one artifact per configured target, in table order.
///
/// Fails on output for a target that is not configured, on a configured
/// target with no output, or with more than one output. Nothing is uploaded
/// by this function, so any failure here leaves the registry untouched.
pub fn collect_artifacts(
    store: &dyn ArtifactStore,
    mapper: &ArtifactNameMapper,
) -> Result<Vec<MappedArtifact>, PublishError> {
    let names = store.list().map_err(PublishError::Transfer)?;

    let mut by_triple: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in &names {
        let (triple, raw) = name.split_once('/').unwrap_or((name.as_str(), ""));
        by_triple.entry(triple).or_default().push(raw);
    }

    let configured: BTreeSet<&str> = mapper.targets().iter().map(|t| t.triple.as_str()).collect();
    if let Some(unknown) = by_triple.keys().find(|t| !configured.contains(*t)) {
        return Err(PublishError::UnknownTarget {
            triple: unknown.to_string(),
        });
    }

    let mut artifacts = Vec::with_capacity(mapper.targets().len());
    for target in mapper.targets() {
        let raw_names = by_triple.get(target.triple.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let raw = match raw_names {
            [] => {
                return Err(PublishError::MissingArtifact {
                    triple: target.triple.clone(),
                    expected: target.transfer_key(),
                });
            }
            [one] => *one,
            many => {
                return Err(PublishError::AmbiguousArtifact {
                    triple: target.triple.clone(),
                    names: many.iter().map(|r| r.to_string()).collect(),
                });
            }
        };

        let canonical_name = mapper.map(&target.triple, raw)?;
        let source = format!("{}/{}", target.triple, raw);
        let content = store
            .get(&source)
            .map_err(PublishError::Transfer)?
            .ok_or_else(|| PublishError::MissingArtifact {
                triple: target.triple.clone(),
                expected: source.clone(),
            })?;

        artifacts.push(MappedArtifact {
            target: target.clone(),
            source,
            canonical_name,
            content,
        });
    }

    Ok(artifacts)
}

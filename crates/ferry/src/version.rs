//! Version resolution from the project's Cargo manifest.
//!
//! Supported layouts:
//!
//! - `[package] version = "1.2.3"`
//! - `[package] version.workspace = true`, inheriting from `[workspace.package]`
//!   in the same manifest or the nearest ancestor workspace manifest
//! - a root manifest with only `[workspace.package] version = "1.2.3"`

use std::fs;
use std::path::{Path, PathBuf};

use ferry_types::Version;
use toml::{Table, Value};

use crate::error::PublishError;

const MANIFEST_FILE: &str = "Cargo.toml";

/// Reads the release version from a manifest. Holds no state beyond the path,
/// so repeated calls on an unchanged manifest return the same version.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    manifest_path: PathBuf,
}

impl VersionResolver {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    pub fn resolve(&self) -> Result<Version, PublishError> {
        let manifest = read_manifest(&self.manifest_path)?;
        let origin = self.manifest_path.display().to_string();

        if let Some(package) = manifest.get("package").and_then(Value::as_table) {
            return match package.get("version") {
                Some(Value::String(raw)) => parse_version_from(raw, &origin),
                Some(Value::Table(t)) if inherits_workspace(t) => self.resolve_inherited(&manifest),
                Some(_) => Err(metadata_error(
                    &origin,
                    "package.version must be a string or { workspace = true }",
                )),
                None => Err(metadata_error(&origin, "package.version is not set")),
            };
        }

        match workspace_version(&manifest) {
            Some(raw) => parse_version_from(raw, &origin),
            None => Err(metadata_error(
                &origin,
                "no [package] version or [workspace.package] version found",
            )),
        }
    }

    /// Package name, used as the default binary name.
    pub fn package_name(&self) -> Result<Option<String>, PublishError> {
        let manifest = read_manifest(&self.manifest_path)?;
        Ok(manifest
            .get("package")
            .and_then(Value::as_table)
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn resolve_inherited(&self, manifest: &Table) -> Result<Version, PublishError> {
        if manifest.contains_key("workspace") {
            let origin = self.manifest_path.display().to_string();
            return match workspace_version(manifest) {
                Some(raw) => parse_version_from(raw, &origin),
                None => Err(metadata_error(
                    &origin,
                    "version.workspace = true but [workspace.package] has no version",
                )),
            };
        }

        // `./Cargo.toml` has no ancestors above `.`; walk the absolute path.
        let absolute = fs::canonicalize(&self.manifest_path).map_err(|e| {
            metadata_error(
                &self.manifest_path.display().to_string(),
                &format!("failed to locate manifest: {e}"),
            )
        })?;
        let start = absolute
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let mut dir = start;
        while let Some(current) = dir {
            let candidate = current.join(MANIFEST_FILE);
            if candidate.is_file() {
                let root = read_manifest(&candidate)?;
                if root.contains_key("workspace") {
                    let origin = candidate.display().to_string();
                    return match workspace_version(&root) {
                        Some(raw) => parse_version_from(raw, &origin),
                        None => Err(metadata_error(
                            &origin,
                            "workspace manifest has no [workspace.package] version",
                        )),
                    };
                }
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        Err(metadata_error(
            &self.manifest_path.display().to_string(),
            "version.workspace = true but no ancestor workspace manifest was found",
        ))
    }
}

/// Validate a version string as semver and wrap it.
///
/// Surrounding whitespace is ignored. A leading `v` is rejected since the tag
/// adds one.
pub fn parse_version(raw: &str) -> Result<Version, PublishError> {
    parse_version_from(raw, &format!("{raw:?}"))
}

fn parse_version_from(raw: &str, origin: &str) -> Result<Version, PublishError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(metadata_error(origin, "version is empty"));
    }
    if trimmed.starts_with('v') || trimmed.starts_with('V') {
        return Err(metadata_error(
            origin,
            &format!("version {trimmed:?} must not carry a 'v' prefix"),
        ));
    }
    semver::Version::parse(trimmed).map_err(|e| {
        metadata_error(
            origin,
            &format!("{trimmed:?} is not a semantic version: {e}"),
        )
    })?;
    Ok(Version::new_unchecked(trimmed))
}

fn read_manifest(path: &Path) -> Result<Table, PublishError> {
    let origin = path.display().to_string();
    let content = fs::read_to_string(path)
        .map_err(|e| metadata_error(&origin, &format!("failed to read manifest: {e}")))?;
    content
        .parse::<Table>()
        .map_err(|e| metadata_error(&origin, &format!("failed to parse manifest as TOML: {e}")))
}

fn inherits_workspace(t: &Table) -> bool {
    t.get("workspace").and_then(Value::as_bool) == Some(true)
}

fn workspace_version(manifest: &Table) -> Option<&str> {
    manifest
        .get("workspace")?
        .as_table()?
        .get("package")?
        .as_table()?
        .get("version")?
        .as_str()
}

fn metadata_error(origin: &str, reason: &str) -> PublishError {
    PublishError::MetadataParse {
        origin: origin.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write manifest");
    }

    fn reason(err: PublishError) -> String {
        match err {
            PublishError::MetadataParse { reason, .. } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolves_package_version() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(
            &manifest,
            "[package]\nname = \"app\"\nversion = \"2.0.0\"\nedition = \"2024\"\n",
        );

        let resolver = VersionResolver::new(&manifest);
        let version = resolver.resolve().expect("resolve");
        assert_eq!(version.as_str(), "2.0.0");
        assert_eq!(version.tag().as_str(), "v2.0.0");
        assert_eq!(resolver.package_name().expect("name"), Some("app".to_string()));
    }

    #[test]
    fn resolution_is_deterministic() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(&manifest, "[package]\nname = \"app\"\nversion = \"1.4.0-rc.1\"\n");

        let resolver = VersionResolver::new(&manifest);
        let first = resolver.resolve().expect("first");
        let second = resolver.resolve().expect("second");
        assert_eq!(first, second);
        assert_eq!(first.tag().as_str(), "v1.4.0-rc.1");
    }

    #[test]
    fn inherits_from_same_manifest_workspace() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(
            &manifest,
            r#"
[workspace]
members = ["."]

[workspace.package]
version = "0.9.1"

[package]
name = "app"
version.workspace = true
"#,
        );

        let version = VersionResolver::new(&manifest).resolve().expect("resolve");
        assert_eq!(version.as_str(), "0.9.1");
    }

    #[test]
    fn inherits_from_ancestor_workspace() {
        let td = tempdir().expect("tempdir");
        write(
            &td.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n\n[workspace.package]\nversion = \"3.1.4\"\n",
        );
        let member = td.path().join("crates").join("app").join("Cargo.toml");
        write(
            &member,
            "[package]\nname = \"app\"\nversion = { workspace = true }\n",
        );

        let version = VersionResolver::new(&member).resolve().expect("resolve");
        assert_eq!(version.as_str(), "3.1.4");
    }

    #[test]
    #[serial]
    fn inherits_from_ancestor_workspace_with_relative_path() {
        let td = tempdir().expect("tempdir");
        write(
            &td.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"app\"]\n\n[workspace.package]\nversion = \"1.2.3\"\n",
        );
        let member_dir = td.path().join("app");
        write(
            &member_dir.join("Cargo.toml"),
            "[package]\nname = \"app\"\nversion.workspace = true\n",
        );

        let previous = std::env::current_dir().expect("cwd");
        std::env::set_current_dir(&member_dir).expect("chdir");
        let dotted = VersionResolver::new("./Cargo.toml").resolve();
        let bare = VersionResolver::new("Cargo.toml").resolve();
        std::env::set_current_dir(previous).expect("restore cwd");

        assert_eq!(dotted.expect("resolve ./Cargo.toml").as_str(), "1.2.3");
        assert_eq!(bare.expect("resolve Cargo.toml").as_str(), "1.2.3");
    }

    #[test]
    fn virtual_workspace_root_version() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(
            &manifest,
            "[workspace]\nmembers = []\n\n[workspace.package]\nversion = \"1.0.0\"\n",
        );

        let resolver = VersionResolver::new(&manifest);
        assert_eq!(resolver.resolve().expect("resolve").as_str(), "1.0.0");
        assert_eq!(resolver.package_name().expect("name"), None);
    }

    #[test]
    fn missing_version_field_is_metadata_error() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(&manifest, "[package]\nname = \"app\"\n");

        let err = VersionResolver::new(&manifest).resolve().expect_err("must fail");
        assert!(reason(err).contains("not set"));
    }

    #[test]
    fn missing_manifest_is_metadata_error() {
        let td = tempdir().expect("tempdir");
        let err = VersionResolver::new(td.path().join("Cargo.toml"))
            .resolve()
            .expect_err("must fail");
        assert!(reason(err).contains("failed to read manifest"));
    }

    #[test]
    fn workspace_inheritance_without_workspace_fails() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("solo").join("Cargo.toml");
        write(&manifest, "[package]\nname = \"app\"\nversion.workspace = true\n");

        let err = VersionResolver::new(&manifest).resolve().expect_err("must fail");
        assert!(matches!(err, PublishError::MetadataParse { .. }));
    }

    #[test]
    fn non_semver_versions_are_rejected() {
        for raw in ["", "1.0", "latest", "1.0.0.0", "v1.0.0", "01.0.0"] {
            assert!(parse_version(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn parse_version_trims_whitespace() {
        let version = parse_version(" 1.2.3+build.5 \n").expect("parse");
        assert_eq!(version.as_str(), "1.2.3+build.5");
    }

    #[test]
    fn invalid_toml_is_metadata_error() {
        let td = tempdir().expect("tempdir");
        let manifest = td.path().join("Cargo.toml");
        write(&manifest, "[package\nname = ");

        let err = VersionResolver::new(&manifest).resolve().expect_err("must fail");
        assert!(reason(err).contains("TOML"));
    }
}

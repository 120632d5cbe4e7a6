//! Configuration file handling for ferry.
//!
//! Configuration is loaded from `.ferry.toml` in the project root and merged
//! with command-line overrides. The `[[targets]]` table is the single source of
//! truth for the build matrix: it drives both the matrix that CI builds and the
//! mapping from raw builder output to published artifact names.
//!
//! # Example
//!
//! ```
//! use ferry_config::{Config, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! let targets = config.target_table("app");
//! assert!(!targets.is_empty());
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ferry_retry::{RetryPolicy, RetryStrategyConfig, RetryStrategyType};
use ferry_types::{BuildTarget, RegistrySettings, TargetTable, Tag};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".ferry.toml";

/// Placeholder substituted with the binary name in target names.
pub const BIN_PLACEHOLDER: &str = "{bin}";

/// Placeholder substituted with the release tag in title and notes.
pub const TAG_PLACEHOLDER: &str = "{tag}";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_UPLOAD_BASE: &str = "https://uploads.github.com";
pub const DEFAULT_TOKEN_ENV: &str = "FERRY_TOKEN";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete ferry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetConfig>,
}

/// Project metadata location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Manifest holding the version field, relative to the project root.
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// Binary name substituted for `{bin}`; defaults to the package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

fn default_manifest() -> PathBuf {
    PathBuf::from("Cargo.toml")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            binary: None,
        }
    }
}

/// Release registry and release record settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// `owner/name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    /// Release title template; `{tag}` is replaced with the tag.
    #[serde(default = "default_title")]
    pub title: String,
    /// Release notes template; `{tag}` is replaced with the tag.
    #[serde(default = "default_notes")]
    pub notes: String,
    /// Environment variable holding the registry token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Upper bound for a single registry request.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_upload_base() -> String {
    DEFAULT_UPLOAD_BASE.to_string()
}
fn default_title() -> String {
    "Release {tag}".to_string()
}
fn default_notes() -> String {
    "Automated release {tag}".to_string()
}
fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            repository: None,
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            title: default_title(),
            notes: default_notes(),
            token_env: default_token_env(),
            timeout: default_timeout(),
        }
    }
}

/// Retry configuration. Explicit fields override the policy preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RetryStrategyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde::option"
    )]
    pub base_delay: Option<Duration>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde::option"
    )]
    pub max_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

/// Artifact transfer and run-state locations, relative to the project root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".ferry")
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
            state_dir: default_state_dir(),
        }
    }
}

/// One `[[targets]]` entry. Names may contain `{bin}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub triple: String,
    pub display_name: String,
    pub raw_name: String,
    pub canonical_name: String,
}

impl TargetConfig {
    fn new(triple: &str, display_name: &str, raw_name: &str, canonical_name: &str) -> Self {
        Self {
            triple: triple.to_string(),
            display_name: display_name.to_string(),
            raw_name: raw_name.to_string(),
            canonical_name: canonical_name.to_string(),
        }
    }

    fn expand(&self, binary: &str) -> BuildTarget {
        BuildTarget {
            triple: self.triple.clone(),
            display_name: self.display_name.clone(),
            raw_name: self.raw_name.replace(BIN_PLACEHOLDER, binary),
            canonical_name: self.canonical_name.replace(BIN_PLACEHOLDER, binary),
        }
    }
}

/// Built-in matrix used when `.ferry.toml` declares no targets.
pub fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig::new("x86_64-unknown-linux-gnu", "linux-x64", "{bin}", "{bin}-linux-x64"),
        TargetConfig::new("aarch64-unknown-linux-gnu", "linux-arm64", "{bin}", "{bin}-linux-arm64"),
        TargetConfig::new(
            "x86_64-pc-windows-msvc",
            "windows-x64",
            "{bin}.exe",
            "{bin}-windows-x64.exe",
        ),
        TargetConfig::new("x86_64-apple-darwin", "macos-x64", "{bin}", "{bin}-macos-x64"),
        TargetConfig::new("aarch64-apple-darwin", "macos-arm64", "{bin}", "{bin}-macos-arm64"),
    ]
}

/// Values supplied on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub repository: Option<String>,
    pub api_base: Option<String>,
    pub upload_base: Option<String>,
    pub notes: Option<String>,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub artifacts_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl Config {
    /// Apply command-line overrides on top of this configuration.
    pub fn with_overrides(mut self, cli: &CliOverrides) -> Self {
        if let Some(v) = &cli.repository {
            self.release.repository = Some(v.clone());
        }
        if let Some(v) = &cli.api_base {
            self.release.api_base = v.clone();
        }
        if let Some(v) = &cli.upload_base {
            self.release.upload_base = v.clone();
        }
        if let Some(v) = &cli.notes {
            self.release.notes = v.clone();
        }
        if let Some(v) = cli.timeout {
            self.release.timeout = v;
        }
        if let Some(v) = cli.max_attempts {
            self.retry.max_attempts = Some(v);
        }
        if let Some(v) = cli.base_delay {
            self.retry.base_delay = Some(v);
        }
        if let Some(v) = cli.max_delay {
            self.retry.max_delay = Some(v);
        }
        if let Some(v) = &cli.artifacts_dir {
            self.artifacts.dir = v.clone();
        }
        if let Some(v) = &cli.state_dir {
            self.artifacts.state_dir = v.clone();
        }
        self
    }

    /// The effective target table with `{bin}` expanded.
    pub fn target_table(&self, binary: &str) -> TargetTable {
        let binary = self.project.binary.as_deref().unwrap_or(binary);
        let entries = if self.targets.is_empty() {
            default_targets()
        } else {
            self.targets.clone()
        };
        TargetTable::new(entries.iter().map(|t| t.expand(binary)).collect())
    }

    /// The effective retry strategy: policy preset, then explicit fields.
    pub fn retry_config(&self) -> RetryStrategyConfig {
        let mut config = self.retry.policy.to_config();
        if let Some(v) = self.retry.strategy {
            config.strategy = v;
        }
        if let Some(v) = self.retry.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.retry.base_delay {
            config.base_delay = v;
        }
        if let Some(v) = self.retry.max_delay {
            config.max_delay = v;
        }
        if let Some(v) = self.retry.jitter {
            config.jitter = v;
        }
        config
    }

    /// Registry connection settings. Requires `release.repository`.
    pub fn registry_settings(&self) -> Result<RegistrySettings> {
        let repository = self
            .release
            .repository
            .clone()
            .context("no release repository configured (set release.repository in .ferry.toml or pass --repository)")?;
        validate_repository(&repository)?;

        Ok(RegistrySettings {
            repository,
            api_base: self.release.api_base.trim_end_matches('/').to_string(),
            upload_base: self.release.upload_base.trim_end_matches('/').to_string(),
            timeout: self.release.timeout,
        })
    }

    /// Check the configuration for errors that must stop a run before any
    /// network call: empty or inconsistent target table, bad retry values.
    pub fn validate(&self, binary: &str) -> Result<()> {
        let table = self.target_table(binary);
        if table.is_empty() {
            bail!("target table is empty");
        }

        let mut triples = BTreeSet::new();
        let mut canonical = BTreeSet::new();
        for t in &table {
            if t.triple.trim().is_empty() {
                bail!("target with empty triple");
            }
            if !triples.insert(t.triple.as_str()) {
                bail!("duplicate target triple: {}", t.triple);
            }
            if !is_flat_name(&t.raw_name) {
                bail!("raw name for {} must be a plain file name: {:?}", t.triple, t.raw_name);
            }
            if !is_flat_name(&t.canonical_name) {
                bail!(
                    "canonical name for {} must be a plain file name: {:?}",
                    t.triple,
                    t.canonical_name
                );
            }
            if !canonical.insert(t.canonical_name.as_str()) {
                bail!("canonical name {} is used by more than one target", t.canonical_name);
            }
        }

        let retry = self.retry_config();
        if retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            bail!("retry.jitter must be between 0.0 and 1.0");
        }

        if let Some(repo) = &self.release.repository {
            validate_repository(repo)?;
        }

        Ok(())
    }
}

/// Substitute `{tag}` in a release title or notes template.
pub fn render_template(template: &str, tag: &Tag) -> String {
    template.replace(TAG_PLACEHOLDER, tag.as_str())
}

fn is_flat_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains(BIN_PLACEHOLDER)
}

fn validate_repository(repo: &str) -> Result<()> {
    match repo.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok(())
        }
        _ => bail!("repository must be in owner/name form, got {repo:?}"),
    }
}

/// Load configuration from a directory
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path. A missing file yields defaults.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("invalid ferry configuration")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.release.repository.is_none());
        assert_eq!(config.release.api_base, DEFAULT_API_BASE);
        assert_eq!(config.release.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(config.release.timeout, Duration::from_secs(30));
        assert_eq!(config.artifacts.state_dir, PathBuf::from(".ferry"));
        assert_eq!(config.retry_config().max_attempts, 3);
    }

    #[test]
    fn load_missing_config_returns_default() {
        let td = tempdir().expect("tempdir");
        let config = load_config(td.path()).expect("load");
        assert!(config.targets.is_empty());
        assert_eq!(config.project.manifest, PathBuf::from("Cargo.toml"));
    }

    #[test]
    fn default_table_has_five_unique_targets() {
        let table = Config::default().target_table("app");
        assert_eq!(table.len(), 5);
        let win = table.find("x86_64-pc-windows-msvc").expect("windows target");
        assert_eq!(win.raw_name, "app.exe");
        assert_eq!(win.canonical_name, "app-windows-x64.exe");
        let linux = table.find("x86_64-unknown-linux-gnu").expect("linux target");
        assert_eq!(linux.raw_name, "app");
        assert_eq!(linux.canonical_name, "app-linux-x64");
        Config::default().validate("app").expect("default table is valid");
    }

    #[test]
    fn load_config_from_toml() {
        let td = tempdir().expect("tempdir");
        let content = r#"
[project]
manifest = "crates/app/Cargo.toml"
binary = "canet"

[release]
repository = "acme/canet"
title = "canet {tag}"
timeout = "10s"

[retry]
policy = "custom"
max_attempts = 4
base_delay = "100ms"

[artifacts]
dir = "dist"

[[targets]]
triple = "x86_64-pc-windows-msvc"
display_name = "windows-x64"
raw_name = "{bin}.exe"
canonical_name = "{bin}-windows-x64.exe"

[[targets]]
triple = "x86_64-unknown-linux-gnu"
display_name = "linux-x64"
raw_name = "{bin}"
canonical_name = "{bin}-linux-x64"
"#;
        std::fs::write(td.path().join(CONFIG_FILE), content).expect("write");

        let config = load_config(td.path()).expect("load");
        assert_eq!(config.project.manifest, PathBuf::from("crates/app/Cargo.toml"));
        assert_eq!(config.release.timeout, Duration::from_secs(10));
        assert_eq!(config.artifacts.dir, PathBuf::from("dist"));

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(100));

        // project.binary wins over the caller-supplied package name
        let table = config.target_table("ignored");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.find("x86_64-pc-windows-msvc").map(|t| t.canonical_name.as_str()),
            Some("canet-windows-x64.exe")
        );

        let tag = ferry_types::Version::new_unchecked("1.0.0").tag();
        assert_eq!(render_template(&config.release.title, &tag), "canet v1.0.0");
        assert_eq!(
            render_template(&config.release.notes, &tag),
            "Automated release v1.0.0"
        );
        config.validate("ignored").expect("valid");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let td = tempdir().expect("tempdir");
        std::fs::write(td.path().join(CONFIG_FILE), "[release\nrepository=").expect("write");
        assert!(load_config(td.path()).is_err());
    }

    #[test]
    fn duplicate_canonical_names_are_rejected() {
        let mut config = Config::default();
        config.targets = vec![
            TargetConfig::new("a", "a", "{bin}", "{bin}-same"),
            TargetConfig::new("b", "b", "{bin}", "{bin}-same"),
        ];
        let err = config.validate("app").unwrap_err();
        assert!(err.to_string().contains("app-same"));
    }

    #[test]
    fn duplicate_triples_are_rejected() {
        let mut config = Config::default();
        config.targets = vec![
            TargetConfig::new("a", "a", "{bin}", "{bin}-1"),
            TargetConfig::new("a", "a", "{bin}", "{bin}-2"),
        ];
        assert!(config.validate("app").is_err());
    }

    #[test]
    fn nested_canonical_names_are_rejected() {
        let mut config = Config::default();
        config.targets = vec![TargetConfig::new("a", "a", "{bin}", "linux/{bin}")];
        assert!(config.validate("app").is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = Config::default().with_overrides(&CliOverrides {
            max_attempts: Some(0),
            ..Default::default()
        });
        assert!(config.validate("app").is_err());
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut config = Config::default();
        config.release.repository = Some("file/repo".to_string());

        let merged = config.with_overrides(&CliOverrides {
            repository: Some("cli/repo".to_string()),
            api_base: Some("http://127.0.0.1:9/".to_string()),
            max_delay: Some(Duration::from_secs(1)),
            state_dir: Some(PathBuf::from("state")),
            ..Default::default()
        });

        let settings = merged.registry_settings().expect("settings");
        assert_eq!(settings.repository, "cli/repo");
        assert_eq!(settings.api_base, "http://127.0.0.1:9");
        assert_eq!(settings.upload_base, DEFAULT_UPLOAD_BASE);
        assert_eq!(merged.retry_config().max_delay, Duration::from_secs(1));
        assert_eq!(merged.artifacts.state_dir, PathBuf::from("state"));
    }

    #[test]
    fn registry_settings_require_owner_and_name() {
        let mut config = Config::default();
        assert!(config.registry_settings().is_err());

        config.release.repository = Some("no-slash".to_string());
        assert!(config.registry_settings().is_err());

        config.release.repository = Some("owner/name".to_string());
        assert!(config.registry_settings().is_ok());
    }

    #[test]
    fn config_path_helper() {
        let dir = PathBuf::from("/project");
        assert_eq!(config_path(&dir), PathBuf::from("/project/.ferry.toml"));
    }

    proptest! {
        #[test]
        fn default_table_is_unique_for_any_binary(bin in "[a-z][a-z0-9_-]{0,15}") {
            let config = Config::default();
            prop_assert!(config.validate(&bin).is_ok());
            let table = config.target_table(&bin);
            for t in &table {
                prop_assert!(t.canonical_name.starts_with(&bin));
                prop_assert!(t.raw_name.starts_with(&bin));
            }
        }
    }
}

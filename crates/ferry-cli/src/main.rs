use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use ferry::PublishError;
use ferry::artifacts::DirArtifactStore;
use ferry::auth::{self, TokenSource};
use ferry::engine::{self, PublishContext, PublishReport, Reporter};
use ferry::receipt::receipt_path;
use ferry::version::VersionResolver;
use ferry_config::{CliOverrides, Config, config_path, load_config_from_file};
use ferry_registry::HttpReleaseRegistry;
use ferry_types::{AuthToken, CancelToken, Outcome, RegistrySettings, TargetTable};

mod progress;

use progress::CliReporter;

#[derive(Parser, Debug)]
#[command(name = "ferry", version)]
#[command(about = "Idempotent publication of cross-compiled binaries to a versioned release")]
struct Cli {
    /// Project root holding Cargo.toml and .ferry.toml
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Config file (default: <project-root>/.ferry.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding build output as <triple>/<raw-name> (default: artifacts)
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish every target's artifact to the release for the current version.
    Publish(PublishArgs),
    /// Show the version, tag and artifact mapping without contacting the registry.
    Plan,
    /// Print the build-target table, e.g. to generate a CI matrix.
    Targets {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(clap::Args, Debug)]
struct PublishArgs {
    /// Repository owning the release, as owner/name
    #[arg(long)]
    repository: Option<String>,

    /// Registry API base URL (default: https://api.github.com)
    #[arg(long)]
    api_base: Option<String>,

    /// Asset upload base URL (default: https://uploads.github.com)
    #[arg(long)]
    upload_base: Option<String>,

    /// Release notes for a newly created release; `{tag}` is substituted
    #[arg(long)]
    notes: Option<String>,

    /// Directory for the event log and receipt (default: .ferry)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Max attempts per registry operation
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Base backoff delay (e.g. 500ms, 2s)
    #[arg(long, value_parser = parse_duration)]
    base_delay: Option<Duration>,

    /// Max backoff delay (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    max_delay: Option<Duration>,

    /// Timeout for a single registry request (e.g. 30s, 2m)
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.cmd {
        Commands::Publish(args) => run_publish(&cli, args),
        Commands::Plan => run_plan(&cli),
        Commands::Targets { format } => run_targets(&cli, *format),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("[error] {e:#}");
            ExitCode::from(exit_byte(Outcome::FatalFailure))
        }
    }
}

fn exit_byte(outcome: Outcome) -> u8 {
    u8::try_from(outcome.exit_code()).unwrap_or(1)
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn load(cli: &Cli, publish: Option<&PublishArgs>) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_path(&cli.project_root));
    let config = load_config_from_file(&path)?;

    let mut overrides = CliOverrides {
        artifacts_dir: cli.artifacts_dir.clone(),
        ..CliOverrides::default()
    };
    if let Some(args) = publish {
        overrides.repository = args.repository.clone();
        overrides.api_base = args.api_base.clone();
        overrides.upload_base = args.upload_base.clone();
        overrides.notes = args.notes.clone();
        overrides.state_dir = args.state_dir.clone();
        overrides.max_attempts = args.max_attempts;
        overrides.base_delay = args.base_delay;
        overrides.max_delay = args.max_delay;
        overrides.timeout = args.timeout;
    }
    Ok(config.with_overrides(&overrides))
}

fn manifest_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.project_root.join(&config.project.manifest)
}

/// `project.binary`, else the manifest's package name.
fn binary_name(config: &Config, manifest: &Path) -> Result<String> {
    if let Some(binary) = &config.project.binary {
        return Ok(binary.clone());
    }
    match VersionResolver::new(manifest).package_name()? {
        Some(name) => Ok(name),
        None => bail!(
            "{} has no [package] name; set project.binary in .ferry.toml",
            manifest.display()
        ),
    }
}

fn run_publish(cli: &Cli, args: &PublishArgs) -> Result<u8> {
    let config = load(cli, Some(args))?;
    let manifest = manifest_path(cli, &config);
    let binary = binary_name(&config, &manifest);
    let targets = match &binary {
        Ok(binary) => config.target_table(binary),
        Err(_) => TargetTable::default(),
    };

    let (settings, token, source) = match binary.and_then(|b| prepare(&config, &b)) {
        Ok(prepared) => prepared,
        Err(e) => return Ok(abort_setup(&manifest, &targets, e)),
    };

    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("[warn] cancellation requested; waiting for the in-flight request");
        handler_cancel.cancel();
    }) {
        let e = anyhow::Error::new(e).context("failed to set signal handler");
        return Ok(abort_setup(&manifest, &targets, e));
    }

    let registry = match HttpReleaseRegistry::new(settings.clone(), token) {
        Ok(registry) => registry
            .with_retry(config.retry_config())
            .with_cancel(cancel.clone()),
        Err(e) => return Ok(abort_setup(&manifest, &targets, e)),
    };
    let store = DirArtifactStore::new(cli.project_root.join(&config.artifacts.dir));
    let state_dir = cli.project_root.join(&config.artifacts.state_dir);

    let mut reporter = CliReporter::new(targets.len());
    reporter.info(&format!(
        "publishing {} target(s) to {} (token from {source})",
        targets.len(),
        settings.repository
    ));

    let ctx = PublishContext {
        manifest_path: manifest,
        targets,
        title_template: config.release.title.clone(),
        notes_template: config.release.notes.clone(),
        repository: settings.repository.clone(),
        state_dir: Some(state_dir.clone()),
        store: &store,
        registry: &registry,
        cancel,
    };
    let report = engine::run_publish(&ctx, &mut reporter);
    reporter.finish();

    for line in report.summary_lines() {
        println!("{line}");
    }
    println!("receipt: {}", receipt_path(&state_dir).display());

    Ok(exit_byte(report.outcome))
}

/// Checks that must pass before anything is sent to the registry.
fn prepare(config: &Config, binary: &str) -> Result<(RegistrySettings, AuthToken, TokenSource)> {
    config.validate(binary)?;
    let settings = config.registry_settings()?;
    let (token, source) = auth::resolve_token(&config.release.token_env).with_context(|| {
        format!(
            "no release token found; set ${} or ${}",
            config.release.token_env,
            auth::FALLBACK_TOKEN_ENV
        )
    })?;
    Ok((settings, token, source))
}

/// Report a publish that failed before it started: the error, then the
/// FATAL summary with every target not attempted.
fn abort_setup(manifest: &Path, targets: &TargetTable, err: anyhow::Error) -> u8 {
    eprintln!("[error] {err:#}");
    let version = VersionResolver::new(manifest).resolve().ok();
    let report = PublishReport::aborted(
        targets,
        version,
        PublishError::Setup {
            reason: format!("{err:#}"),
        },
    );
    for line in report.summary_lines() {
        println!("{line}");
    }
    exit_byte(report.outcome)
}

fn run_plan(cli: &Cli) -> Result<u8> {
    let config = load(cli, None)?;
    let manifest = manifest_path(cli, &config);
    let binary = binary_name(&config, &manifest)?;
    config.validate(&binary)?;

    let store = DirArtifactStore::new(cli.project_root.join(&config.artifacts.dir));
    let plan = engine::run_plan(&manifest, config.target_table(&binary), &store)?;

    println!("version: {}", plan.version);
    println!("tag: {}", plan.tag);
    println!();
    for artifact in &plan.artifacts {
        println!(
            "{} ({}): {} -> {} ({} bytes, sha256 {})",
            artifact.target.display_name,
            artifact.target.triple,
            artifact.source,
            artifact.canonical_name,
            artifact.size(),
            artifact.sha256()
        );
    }

    Ok(exit_byte(Outcome::Success))
}

fn run_targets(cli: &Cli, format: Format) -> Result<u8> {
    let config = load(cli, None)?;
    let manifest = manifest_path(cli, &config);
    let binary = binary_name(&config, &manifest)?;
    config.validate(&binary)?;
    let targets = config.target_table(&binary);

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&targets).context("failed to serialize targets")?;
            println!("{json}");
        }
        Format::Text => {
            for t in &targets {
                println!(
                    "{}\t{}\t{}\t{}",
                    t.triple, t.display_name, t.raw_name, t.canonical_name
                );
            }
        }
    }

    Ok(exit_byte(Outcome::Success))
}

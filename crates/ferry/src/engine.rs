use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ferry_config::render_template;
use ferry_events::{EventLog, RUN_SCOPE, events_path};
use ferry_registry::{RegistryError, ReleaseRegistry};
use ferry_retry::Classify;
use ferry_types::{
    CancelToken, EventType, Outcome, RECEIPT_VERSION, Receipt, Tag, TargetTable, UploadResult,
    UploadStatus, Version,
};

use crate::artifacts::{ArtifactStore, MappedArtifact, collect_artifacts};
use crate::error::PublishError;
use crate::mapper::ArtifactNameMapper;
use crate::receipt;
use crate::version::VersionResolver;

/// Skip reason for targets left behind by a cancelled run.
pub const CANCELLED_REASON: &str = "cancelled";
/// Skip reason for targets left behind by a fatal error.
pub const NOT_ATTEMPTED_REASON: &str = "not attempted: run aborted";

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);

    /// Called after each artifact's upload finishes, successfully or not.
    fn upload_finished(&mut self, _done: usize, _total: usize) {}
}

/// Everything a publication run needs. The registry and store are borrowed so
/// callers can substitute in-memory implementations.
pub struct PublishContext<'a> {
    pub manifest_path: PathBuf,
    pub targets: TargetTable,
    /// Release title template, `{tag}` substituted.
    pub title_template: String,
    /// Release notes template, `{tag}` substituted.
    pub notes_template: String,
    /// `owner/name`, recorded in the receipt.
    pub repository: String,
    /// Where `events.jsonl` and `receipt.json` go; `None` keeps the run in memory.
    pub state_dir: Option<PathBuf>,
    pub store: &'a dyn ArtifactStore,
    pub registry: &'a dyn ReleaseRegistry,
    pub cancel: CancelToken,
}

/// Result of a publication run. Always lists every configured target.
#[derive(Debug)]
pub struct PublishReport {
    pub outcome: Outcome,
    pub version: Option<Version>,
    pub tag: Option<Tag>,
    pub release_created: bool,
    /// The error that ended the run early, if any.
    pub fatal: Option<PublishError>,
    pub results: Vec<UploadResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PublishReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn failed(&self) -> impl Iterator<Item = &UploadResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, UploadStatus::Failed { .. }))
    }

    /// Human-readable summary: outcome, counts, then one line per target.
    pub fn summary_lines(&self) -> Vec<String> {
        let tag = self
            .tag
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<unresolved tag>".to_string());
        let count = |label: &str| self.results.iter().filter(|r| r.status.label() == label).count();

        let mut lines = vec![
            format!("{}: {tag}", self.outcome),
            format!(
                "{} uploaded, {} failed, {} skipped",
                count("uploaded"),
                count("failed"),
                count("skipped")
            ),
        ];
        for r in &self.results {
            let detail = match &r.status {
                UploadStatus::Uploaded => format!(" [{} attempt(s)]", r.attempts),
                UploadStatus::Failed { message, .. } => format!(": {message}"),
                UploadStatus::Skipped { reason } => format!(": {reason}"),
            };
            lines.push(format!(
                "  {:<8} {} ({}) -> {}{detail}",
                r.status.label(),
                r.display_name,
                r.target,
                r.canonical_name
            ));
        }
        if let Some(err) = &self.fatal {
            lines.push(format!("error: {err}"));
        }
        lines
    }

    pub fn to_receipt(&self, repository: &str) -> Receipt {
        Receipt {
            receipt_version: RECEIPT_VERSION.to_string(),
            version: self.version.clone(),
            tag: self.tag.clone(),
            repository: repository.to_string(),
            outcome: self.outcome,
            release_created: self.release_created,
            fatal_error: self.fatal.as_ref().map(|e| e.to_string()),
            started_at: self.started_at,
            finished_at: self.finished_at,
            results: self.results.clone(),
        }
    }

    /// FATAL report for a run that stopped before any stage ran, e.g. on a
    /// missing token. Every target is listed as not attempted.
    pub fn aborted(targets: &TargetTable, version: Option<Version>, err: PublishError) -> Self {
        let now = Utc::now();
        PublishReport {
            outcome: Outcome::FatalFailure,
            tag: version.as_ref().map(Version::tag),
            version,
            release_created: false,
            results: not_attempted(targets, &err),
            fatal: Some(err),
            started_at: now,
            finished_at: now,
        }
    }
}

fn not_attempted(targets: &TargetTable, err: &PublishError) -> Vec<UploadResult> {
    let reason = match err {
        PublishError::Cancelled { .. } => CANCELLED_REASON,
        _ => NOT_ATTEMPTED_REASON,
    };
    targets
        .iter()
        .map(|t| UploadResult::skipped(t, reason))
        .collect()
}

/// What a publish would do, without touching the registry.
#[derive(Debug)]
pub struct PublishPlan {
    pub version: Version,
    pub tag: Tag,
    pub artifacts: Vec<MappedArtifact>,
}

/// Resolve the version and map the builder output. No network calls.
pub fn run_plan(
    manifest_path: &Path,
    targets: TargetTable,
    store: &dyn ArtifactStore,
) -> Result<PublishPlan, PublishError> {
    let version = VersionResolver::new(manifest_path).resolve()?;
    let mapper = ArtifactNameMapper::new(targets)?;
    let artifacts = collect_artifacts(store, &mapper)?;
    Ok(PublishPlan {
        tag: version.tag(),
        version,
        artifacts,
    })
}

/// Publish every configured target's artifact to the release for the
/// project's current version.
///
/// Stages run in order: resolve version, collect and map artifacts, ensure
/// the release exists, upload all. Any failure before the upload stage is
/// fatal and nothing is uploaded. Upload failures are recorded per target
/// and the loop continues.
pub fn run_publish(ctx: &PublishContext<'_>, reporter: &mut dyn Reporter) -> PublishReport {
    let mut run = Run {
        ctx,
        events: EventLog::new(),
        version: None,
        tag: None,
        release_created: false,
    };
    let started_at = Utc::now();
    run.events.record_now(
        EventType::RunStarted {
            target_count: ctx.targets.len(),
        },
        RUN_SCOPE,
    );

    let (outcome, fatal, results) = match run.execute(reporter) {
        Ok(results) => (Outcome::from_results(&results), None, results),
        Err(err) => {
            reporter.error(&err.to_string());
            run.events.record_now(
                EventType::Fatal {
                    message: err.to_string(),
                },
                RUN_SCOPE,
            );
            let results = not_attempted(&ctx.targets, &err);
            (Outcome::FatalFailure, Some(err), results)
        }
    };

    run.events
        .record_now(EventType::RunFinished { outcome }, RUN_SCOPE);

    let report = PublishReport {
        outcome,
        version: run.version.take(),
        tag: run.tag.take(),
        release_created: run.release_created,
        fatal,
        results,
        started_at,
        finished_at: Utc::now(),
    };

    if let Some(state_dir) = &ctx.state_dir {
        if let Err(e) = run.events.flush_to(&events_path(state_dir)) {
            reporter.warn(&format!("failed to write event log: {e:#}"));
        }
        if let Err(e) = receipt::write_receipt(state_dir, &report.to_receipt(&ctx.repository)) {
            reporter.warn(&format!("failed to write receipt: {e:#}"));
        }
    }

    report
}

struct Run<'c, 'a> {
    ctx: &'c PublishContext<'a>,
    events: EventLog,
    version: Option<Version>,
    tag: Option<Tag>,
    release_created: bool,
}

impl Run<'_, '_> {
    fn execute(&mut self, reporter: &mut dyn Reporter) -> Result<Vec<UploadResult>, PublishError> {
        self.check_cancelled("version resolution")?;
        let version = VersionResolver::new(&self.ctx.manifest_path).resolve()?;
        let tag = version.tag();
        reporter.info(&format!("version {version}, tag {tag}"));
        self.events.record_now(
            EventType::VersionResolved {
                version: version.to_string(),
                tag: tag.to_string(),
            },
            RUN_SCOPE,
        );
        self.version = Some(version);
        self.tag = Some(tag.clone());

        self.check_cancelled("artifact mapping")?;
        let mapper = ArtifactNameMapper::new(self.ctx.targets.clone())?;
        let artifacts = collect_artifacts(self.ctx.store, &mapper)?;
        reporter.info(&format!("mapped {} artifact(s)", artifacts.len()));
        self.events.record_now(
            EventType::ArtifactsMapped {
                count: artifacts.len(),
            },
            RUN_SCOPE,
        );

        self.check_cancelled("release creation")?;
        self.ensure_release(&tag, reporter)?;

        Ok(self.upload_all(&tag, &artifacts, reporter))
    }

    fn check_cancelled(&mut self, stage: &'static str) -> Result<(), PublishError> {
        if self.ctx.cancel.is_cancelled() {
            self.events.record_now(EventType::Cancelled, RUN_SCOPE);
            return Err(PublishError::Cancelled { stage });
        }
        Ok(())
    }

    fn ensure_release(&mut self, tag: &Tag, reporter: &mut dyn Reporter) -> Result<(), PublishError> {
        let registry = self.ctx.registry;
        let exists = registry.exists(tag)?;
        self.events
            .record_now(EventType::ReleaseChecked { exists }, RUN_SCOPE);
        if exists {
            reporter.info(&format!("release {tag} already exists"));
            return Ok(());
        }

        let title = render_template(&self.ctx.title_template, tag);
        let notes = render_template(&self.ctx.notes_template, tag);
        match registry.create(tag, &title, &notes) {
            Ok(_) => {
                reporter.info(&format!("created release {tag} ({title})"));
                self.release_created = true;
                self.events
                    .record_now(EventType::ReleaseCreated { title }, RUN_SCOPE);
                Ok(())
            }
            Err(RegistryError::AlreadyExists { .. }) => {
                reporter.warn(&format!(
                    "release {tag} was created by a concurrent run; continuing"
                ));
                self.events
                    .record_now(EventType::ReleaseCreateRaced, RUN_SCOPE);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn upload_all(
        &mut self,
        tag: &Tag,
        artifacts: &[MappedArtifact],
        reporter: &mut dyn Reporter,
    ) -> Vec<UploadResult> {
        let total = artifacts.len();
        let mut results = Vec::with_capacity(total);
        let mut cancel_noted = false;

        for (idx, artifact) in artifacts.iter().enumerate() {
            let triple = artifact.target.triple.as_str();
            let name = artifact.canonical_name.as_str();

            if self.ctx.cancel.is_cancelled() {
                if !cancel_noted {
                    reporter.warn("cancelled; remaining artifacts will not be uploaded");
                    self.events.record_now(EventType::Cancelled, RUN_SCOPE);
                    cancel_noted = true;
                }
                results.push(self.skip(artifact, CANCELLED_REASON));
                continue;
            }

            reporter.info(&format!("[{}/{total}] {name}: uploading...", idx + 1));
            self.events.record_now(
                EventType::UploadStarted {
                    canonical_name: name.to_string(),
                    size: artifact.size(),
                },
                triple,
            );

            let mut result = UploadResult {
                size: Some(artifact.size()),
                sha256: Some(artifact.sha256()),
                ..UploadResult::skipped(&artifact.target, "")
            };
            match self.ctx.registry.upload(tag, name, &artifact.content) {
                Ok(uploaded) => {
                    let verb = if uploaded.replaced { "replaced" } else { "uploaded" };
                    reporter.info(&format!(
                        "{name}: {verb} after {} attempt(s)",
                        uploaded.attempts
                    ));
                    self.events.record_now(
                        EventType::UploadSucceeded {
                            canonical_name: name.to_string(),
                            attempts: uploaded.attempts,
                        },
                        triple,
                    );
                    result.status = UploadStatus::Uploaded;
                    result.attempts = uploaded.attempts;
                }
                // Nothing reached the registry for this artifact.
                Err(RegistryError::Cancelled { .. }) => {
                    result = self.skip(artifact, CANCELLED_REASON);
                }
                Err(e) => {
                    reporter.error(&format!("{name}: {e}"));
                    self.events.record_now(
                        EventType::UploadFailed {
                            canonical_name: name.to_string(),
                            class: e.class(),
                            message: e.to_string(),
                        },
                        triple,
                    );
                    result.attempts = match &e {
                        RegistryError::Unavailable { attempts, .. }
                        | RegistryError::Interrupted { attempts, .. } => *attempts,
                        RegistryError::EmptyContent { .. } => 0,
                        _ => 1,
                    };
                    result.status = UploadStatus::Failed {
                        class: e.class(),
                        message: e.to_string(),
                    };
                }
            }
            results.push(result);
            reporter.upload_finished(idx + 1, total);
        }

        results
    }

    fn skip(&mut self, artifact: &MappedArtifact, reason: &str) -> UploadResult {
        self.events.record_now(
            EventType::UploadSkipped {
                canonical_name: artifact.canonical_name.clone(),
                reason: reason.to_string(),
            },
            &artifact.target.triple,
        );
        UploadResult::skipped(&artifact.target, reason)
    }
}

use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::Serialize;

use crate::config::{ConfigStore, RecordSetConfig};
use crate::domain::SnapshotBranch;
use crate::error::IngestError;
use crate::fetch::{FetchBatch, Fetcher};
use crate::layout::{DEFAULT_NON_BIDS_DIR, SnapshotFile, expand_native_tree, expand_standardized};
use crate::snapshot::{SnapshotState, SnapshotStore, branch_state};
use crate::vcs::{CommitOutcome, MergeOutcome, SnapshotRepo};

pub const REFUSE_MERGE_MESSAGE: &str = "Refuse to merge into incoming* branch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Impossible,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Impossible => write!(f, "impossible"),
            Status::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OnFailure {
    #[default]
    Raise,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub merge: bool,
    pub force: bool,
    pub on_failure: OnFailure,
    pub non_bids_dir: String,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            merge: false,
            force: false,
            on_failure: OnFailure::Raise,
            non_bids_dir: DEFAULT_NON_BIDS_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MergeReport {
    NotRequested,
    Absent,
    UpToDate,
    /// The next stage was derived from this stage's tip and carries its content.
    Covered { by: &'static str },
    Merged { commit_id: String },
    Conflict { paths: Vec<String> },
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: &'static str,
    pub changed: bool,
    pub commit: Option<String>,
    pub merge: MergeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub status: Status,
    pub message: String,
    pub main_branch: Option<String>,
    pub branches: Vec<BranchReport>,
    pub retrieved: Vec<String>,
    pub missing: Vec<String>,
    pub layout_errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl UpdateResult {
    fn empty(status: Status, message: String, main_branch: Option<String>) -> Self {
        Self {
            status,
            message,
            main_branch,
            branches: Vec::new(),
            retrieved: Vec::new(),
            missing: Vec::new(),
            layout_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn branch(&self, branch: SnapshotBranch) -> Option<&BranchReport> {
        self.branches.iter().find(|report| report.branch == branch.name())
    }

    pub fn merge_attempts(&self) -> usize {
        self.branches
            .iter()
            .filter(|report| {
                matches!(
                    report.merge,
                    MergeReport::Merged { .. } | MergeReport::Conflict { .. }
                )
            })
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub subject_id: String,
    pub records: Vec<String>,
    pub use_standard_layout: bool,
    pub current_branch: String,
    pub branches: Vec<SnapshotState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub config_path: String,
    pub subject_id: String,
    pub records: Vec<String>,
    pub use_standard_layout: bool,
    pub replaced: bool,
}

pub fn init_record_set(
    store: &ConfigStore,
    config: &RecordSetConfig,
    force: bool,
) -> Result<InitResult, IngestError> {
    let replaced = store.exists();
    store.init(config, force)?;
    tracing::info!(path = %store.path().display(), records = config.records().len(), "record set initialized");
    Ok(InitResult {
        config_path: store.path().display().to_string(),
        subject_id: config.subject_id.to_string(),
        records: config.records().iter().map(ToString::to_string).collect(),
        use_standard_layout: config.use_standard_layout,
        replaced,
    })
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

#[derive(Clone)]
pub struct App<R: SnapshotRepo, F: Fetcher> {
    repo: R,
    fetcher: F,
}

impl<R: SnapshotRepo, F: Fetcher> App<R, F> {
    pub fn new(repo: R, fetcher: F) -> Self {
        Self { repo, fetcher }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn show(&self, config: &RecordSetConfig) -> Result<ShowResult, IngestError> {
        let current = self.repo.current_branch()?;
        let branches = SnapshotBranch::ALL
            .iter()
            .map(|branch| branch_state(&self.repo, *branch, &current))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ShowResult {
            subject_id: config.subject_id.to_string(),
            records: config.records().iter().map(ToString::to_string).collect(),
            use_standard_layout: config.use_standard_layout,
            current_branch: current,
            branches,
        })
    }

    pub fn update(
        &self,
        config: &RecordSetConfig,
        options: &UpdateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<UpdateResult, IngestError> {
        let started = Instant::now();
        phase(sink, "phase=Check; verifying repository state".to_string());

        let dirt = self.repo.dirty_paths()?;
        if !dirt.is_empty() {
            let message = format!(
                "Refuse to operate on dirty repository ({} path(s): {})",
                dirt.len(),
                dirt.join(", ")
            );
            tracing::warn!(paths = dirt.len(), "repository is dirty");
            return finish(options, UpdateResult::empty(Status::Error, message, None));
        }

        let tool = self.fetcher.locate()?;
        tracing::debug!(tool = %tool.display(), "fetch tool resolved");

        let main = self.repo.current_branch()?;
        if options.merge && SnapshotBranch::is_snapshot_name(&main) {
            tracing::warn!(branch = %main, "refusing to merge into snapshot branch");
            return finish(
                options,
                UpdateResult::empty(
                    Status::Impossible,
                    REFUSE_MERGE_MESSAGE.to_string(),
                    Some(main),
                ),
            );
        }

        let mut result = UpdateResult::empty(Status::Ok, String::new(), Some(main.clone()));
        self.run_stages(config, options, sink, &mut result)?;

        if options.merge {
            phase(sink, format!("phase=Merge; merging snapshots into {main}"));
            self.merge_stages(&main, config, &mut result)?;
        } else {
            for report in &mut result.branches {
                report.merge = MergeReport::NotRequested;
            }
        }

        result.message = summarize(&result, &main);
        sink.event(ProgressEvent {
            message: format!("phase=Done; {}", result.message),
            elapsed: Some(started.elapsed()),
        });
        finish(options, result)
    }

    fn run_stages(
        &self,
        config: &RecordSetConfig,
        options: &UpdateOptions,
        sink: &dyn ProgressSink,
        result: &mut UpdateResult,
    ) -> Result<(), IngestError> {
        let mut store = SnapshotStore::new(&self.repo)?;
        let subject = &config.subject_id;

        phase(sink, format!("phase=Fetch; {} record(s)", config.records().len()));
        let fetched = self.fetch_raw(config, result)?;

        phase(sink, format!("phase=Store; updating {}", SnapshotBranch::Raw));
        store.open(SnapshotBranch::Raw)?;
        store.overlay(SnapshotBranch::Raw, &fetched)?;
        let raw = store.commit(
            SnapshotBranch::Raw,
            &format!(
                "Update raw downloads for subject {subject} ({} file(s))",
                fetched.len()
            ),
        )?;
        push_report(result, SnapshotBranch::Raw, &raw);

        let native = if self.needs_derivation(SnapshotBranch::Native, raw.changed, options)? {
            phase(sink, format!("phase=Layout; deriving {}", SnapshotBranch::Native));
            let raw_files = store.read_content(SnapshotBranch::Raw)?;
            let expansion = expand_native_tree(&raw_files, subject, config.records());
            for record in &expansion.missing {
                let record = record.to_string();
                if !result.missing.contains(&record) {
                    result.missing.push(record);
                }
            }
            result
                .layout_errors
                .extend(expansion.errors.iter().map(ToString::to_string));

            store.open(SnapshotBranch::Native)?;
            store.replace_content(SnapshotBranch::Native, &expansion.entries)?;
            let native = store.commit(
                SnapshotBranch::Native,
                &format!(
                    "Extract {} record(s) for subject {subject} into native layout",
                    config.records().len() - expansion.missing.len()
                ),
            )?;
            self.repo
                .set_derived_from(SnapshotBranch::Native.name(), &raw.commit_id)?;
            native
        } else {
            self.unchanged(SnapshotBranch::Native)?
        };
        push_report(result, SnapshotBranch::Native, &native);

        if !config.use_standard_layout {
            return Ok(());
        }
        let standardized =
            if self.needs_derivation(SnapshotBranch::Standardized, native.changed, options)? {
                phase(
                    sink,
                    format!("phase=Layout; deriving {}", SnapshotBranch::Standardized),
                );
                store.open(SnapshotBranch::Native)?;
                let native_files = store.read_content(SnapshotBranch::Native)?;
                let entries = expand_standardized(&native_files, subject, &options.non_bids_dir);

                store.open(SnapshotBranch::Standardized)?;
                store.replace_content(SnapshotBranch::Standardized, &entries)?;
                let standardized = store.commit(
                    SnapshotBranch::Standardized,
                    &format!("Reorganize subject {subject} into BIDS layout"),
                )?;
                self.repo
                    .set_derived_from(SnapshotBranch::Standardized.name(), &native.commit_id)?;
                standardized
            } else {
                self.unchanged(SnapshotBranch::Standardized)?
            };
        push_report(result, SnapshotBranch::Standardized, &standardized);
        Ok(())
    }

    fn fetch_raw(
        &self,
        config: &RecordSetConfig,
        result: &mut UpdateResult,
    ) -> Result<Vec<SnapshotFile>, IngestError> {
        let batch = FetchBatch::new(&config.subject_id, config.records())?;
        let outcome = match self.fetcher.fetch(&batch) {
            Ok(outcome) => outcome,
            Err(err @ IngestError::FetchIncomplete { .. }) => {
                tracing::warn!(error = %err, "continuing with the existing raw snapshot");
                result.warnings.push(err.to_string());
                result
                    .missing
                    .extend(config.records().iter().map(ToString::to_string));
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        if let Some(warning) = outcome.warning {
            tracing::warn!(warning = %warning, "fetch tool reported a failure");
            result.warnings.push(warning);
        }
        result
            .missing
            .extend(outcome.missing.iter().map(ToString::to_string));

        outcome
            .files
            .into_iter()
            .map(|file| {
                let content = fs::read(&file.path).map_err(|err| {
                    IngestError::Filesystem(format!("read {}: {err}", file.path.display()))
                })?;
                result.retrieved.push(file.file_name.clone());
                Ok(SnapshotFile {
                    path: Utf8PathBuf::from(file.file_name),
                    content,
                })
            })
            .collect()
    }

    fn needs_derivation(
        &self,
        branch: SnapshotBranch,
        upstream_changed: bool,
        options: &UpdateOptions,
    ) -> Result<bool, IngestError> {
        if options.force || upstream_changed || !self.repo.branch_exists(branch.name())? {
            return Ok(true);
        }
        match branch.upstream() {
            Some(upstream) => Ok(!self.reflects(branch, upstream)?),
            None => Ok(false),
        }
    }

    /// Whether `derived` was last built from the current tip of `upstream`
    /// or a descendant of it.
    fn reflects(
        &self,
        derived: SnapshotBranch,
        upstream: SnapshotBranch,
    ) -> Result<bool, IngestError> {
        let Some(source) = self.repo.derived_from(derived.name())? else {
            return Ok(false);
        };
        match self.repo.branch_tip(upstream.name())? {
            Some(tip) => self.repo.is_ancestor(&tip, &source),
            None => Ok(false),
        }
    }

    fn unchanged(&self, branch: SnapshotBranch) -> Result<CommitOutcome, IngestError> {
        tracing::debug!(branch = branch.name(), "nothing to derive");
        Ok(CommitOutcome {
            changed: false,
            commit_id: self.repo.branch_tip(branch.name())?.unwrap_or_default(),
        })
    }

    fn merge_stages(
        &self,
        main: &str,
        config: &RecordSetConfig,
        result: &mut UpdateResult,
    ) -> Result<(), IngestError> {
        let stages: Vec<SnapshotBranch> = SnapshotBranch::ALL
            .into_iter()
            .filter(|stage| config.use_standard_layout || *stage != SnapshotBranch::Standardized)
            .collect();
        let mut failed = false;

        for (index, stage) in stages.iter().enumerate() {
            let report = if failed {
                MergeReport::Skipped
            } else if !self.repo.branch_exists(stage.name())? {
                MergeReport::Absent
            } else if self.repo.is_ancestor(stage.name(), main)? {
                MergeReport::UpToDate
            } else if let Some(next) = self.covering_stage(*stage, stages.get(index + 1))? {
                MergeReport::Covered { by: next.name() }
            } else {
                match self.repo.merge_into(stage.name(), main)? {
                    MergeOutcome::Merged { commit_id } => {
                        tracing::info!(branch = stage.name(), into = main, "merged snapshot");
                        MergeReport::Merged { commit_id }
                    }
                    MergeOutcome::NoOp => MergeReport::UpToDate,
                    MergeOutcome::Conflict { paths } => {
                        tracing::warn!(branch = stage.name(), paths = paths.len(), "merge conflict");
                        failed = true;
                        result.status = Status::Error;
                        MergeReport::Conflict { paths }
                    }
                }
            };
            if let Some(entry) = result
                .branches
                .iter_mut()
                .find(|entry| entry.branch == stage.name())
            {
                entry.merge = report;
            }
        }
        Ok(())
    }

    fn covering_stage(
        &self,
        stage: SnapshotBranch,
        next: Option<&SnapshotBranch>,
    ) -> Result<Option<SnapshotBranch>, IngestError> {
        match next {
            Some(next) if self.reflects(*next, stage)? => Ok(Some(*next)),
            _ => Ok(None),
        }
    }
}

fn push_report(result: &mut UpdateResult, branch: SnapshotBranch, outcome: &CommitOutcome) {
    result.branches.push(BranchReport {
        branch: branch.name(),
        changed: outcome.changed,
        commit: (!outcome.commit_id.is_empty()).then(|| outcome.commit_id.clone()),
        merge: MergeReport::NotRequested,
    });
}

fn summarize(result: &UpdateResult, main: &str) -> String {
    let mut parts = Vec::new();
    let changed: Vec<&str> = result
        .branches
        .iter()
        .filter(|report| report.changed)
        .map(|report| report.branch)
        .collect();
    if changed.is_empty() {
        parts.push("No new content".to_string());
    } else {
        parts.push(format!("Updated {}", changed.join(", ")));
    }

    let merged: Vec<&str> = result
        .branches
        .iter()
        .filter(|report| matches!(report.merge, MergeReport::Merged { .. }))
        .map(|report| report.branch)
        .collect();
    if !merged.is_empty() {
        parts.push(format!("merged {} into {main}", merged.join(", ")));
    }
    for report in &result.branches {
        if let MergeReport::Conflict { paths } = &report.merge {
            parts.push(format!(
                "merge of {} into {main} conflicts on {}; {main} left untouched",
                report.branch,
                paths.join(", ")
            ));
        }
    }
    if !result.missing.is_empty() {
        parts.push(format!("missing records: {}", result.missing.join(", ")));
    }
    if !result.layout_errors.is_empty() {
        parts.push(format!("layout errors: {}", result.layout_errors.join("; ")));
    }
    parts.join("; ")
}

fn finish(options: &UpdateOptions, result: UpdateResult) -> Result<UpdateResult, IngestError> {
    if result.status != Status::Ok && options.on_failure == OnFailure::Raise {
        return Err(IngestError::CycleFailed {
            status: result.status.to_string(),
            message: result.message,
        });
    }
    Ok(result)
}

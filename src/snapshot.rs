use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::SnapshotBranch;
use crate::error::IngestError;
use crate::fs_util;
use crate::layout::{LayoutEntry, SnapshotFile};
use crate::vcs::{Branch, CommitOutcome, SnapshotRepo, SnapshotWorkspace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotState {
    pub branch: SnapshotBranch,
    pub name: &'static str,
    pub exists: bool,
    pub is_current_checkout: bool,
    pub tip: Option<String>,
}

pub fn branch_state<R: SnapshotRepo>(
    repo: &R,
    branch: SnapshotBranch,
    current: &str,
) -> Result<SnapshotState, IngestError> {
    let tip = repo.branch_tip(branch.name())?;
    Ok(SnapshotState {
        branch,
        name: branch.name(),
        exists: tip.is_some(),
        is_current_checkout: current == branch.name(),
        tip,
    })
}

pub struct SnapshotStore<'a, R: SnapshotRepo> {
    repo: &'a R,
    workspace: R::Workspace,
}

impl<'a, R: SnapshotRepo> SnapshotStore<'a, R> {
    pub fn new(repo: &'a R) -> Result<Self, IngestError> {
        let workspace = repo.open_workspace()?;
        Ok(Self { repo, workspace })
    }

    pub fn open(&mut self, branch: SnapshotBranch) -> Result<Branch, IngestError> {
        let handle = self.repo.ensure_branch(branch.name())?;
        self.workspace.checkout(branch.name())?;
        Ok(handle)
    }

    pub fn read_content(&self, branch: SnapshotBranch) -> Result<Vec<SnapshotFile>, IngestError> {
        self.require_checkout(branch)?;
        let root = self.workspace.root();
        self.repo
            .tracked_files(branch.name())?
            .into_iter()
            .map(|path| {
                let content = fs_util::read_file(root, &path)?;
                Ok(SnapshotFile { path, content })
            })
            .collect()
    }

    pub fn overlay(
        &self,
        branch: SnapshotBranch,
        files: &[SnapshotFile],
    ) -> Result<(), IngestError> {
        self.require_checkout(branch)?;
        let root = self.workspace.root();
        for file in files {
            fs_util::write_file(root, &file.path, &file.content)?;
        }
        Ok(())
    }

    pub fn replace_content(
        &self,
        branch: SnapshotBranch,
        entries: &[LayoutEntry],
    ) -> Result<(), IngestError> {
        self.require_checkout(branch)?;
        let root = self.workspace.root();
        let keep: BTreeSet<&Utf8PathBuf> =
            entries.iter().map(|entry| &entry.destination).collect();
        for path in self.repo.tracked_files(branch.name())? {
            if !keep.contains(&path) {
                fs_util::remove_file_pruning(root, &path)?;
            }
        }
        for entry in entries {
            fs_util::write_file(root, &entry.destination, &entry.content)?;
        }
        Ok(())
    }

    pub fn commit(
        &self,
        branch: SnapshotBranch,
        message: &str,
    ) -> Result<CommitOutcome, IngestError> {
        let outcome = self.workspace.commit_all(branch.name(), message)?;
        if outcome.changed {
            tracing::info!(branch = branch.name(), commit = %outcome.commit_id, "committed snapshot");
        } else {
            tracing::info!(branch = branch.name(), "snapshot unchanged");
        }
        Ok(outcome)
    }

    fn require_checkout(&self, branch: SnapshotBranch) -> Result<(), IngestError> {
        match self.workspace.held_branch() {
            Some(held) if held == branch.name() => Ok(()),
            held => Err(IngestError::WrongBranch {
                expected: branch.name().to_string(),
                actual: held.unwrap_or("(nothing)").to_string(),
            }),
        }
    }
}

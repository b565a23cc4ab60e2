use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub name: String,
    pub tip: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub changed: bool,
    pub commit_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MergeOutcome {
    Merged { commit_id: String },
    NoOp,
    Conflict { paths: Vec<String> },
}

pub trait SnapshotRepo {
    type Workspace: SnapshotWorkspace;

    fn worktree(&self) -> &Utf8Path;
    fn current_branch(&self) -> Result<String, IngestError>;
    /// Untracked or modified paths, plus any unfinished merge.
    fn dirty_paths(&self) -> Result<Vec<String>, IngestError>;
    fn branch_tip(&self, name: &str) -> Result<Option<String>, IngestError>;
    fn tracked_files(&self, branch: &str) -> Result<Vec<Utf8PathBuf>, IngestError>;
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, IngestError>;

    /// Creates the branch from an empty root commit if it does not exist.
    fn ensure_branch(&self, name: &str) -> Result<Branch, IngestError>;
    fn derived_from(&self, branch: &str) -> Result<Option<String>, IngestError>;
    fn set_derived_from(&self, branch: &str, upstream_commit: &str) -> Result<(), IngestError>;
    fn open_workspace(&self) -> Result<Self::Workspace, IngestError>;
    fn merge_into(&self, source: &str, target: &str) -> Result<MergeOutcome, IngestError>;

    fn branch_exists(&self, name: &str) -> Result<bool, IngestError> {
        Ok(self.branch_tip(name)?.is_some())
    }
}

pub trait SnapshotWorkspace {
    fn root(&self) -> &Utf8Path;
    fn held_branch(&self) -> Option<&str>;
    fn checkout(&mut self, branch: &str) -> Result<(), IngestError>;
    /// Commits the workspace content to the held branch unless its tree
    /// equals the branch tip's tree.
    fn commit_all(&self, branch: &str, message: &str) -> Result<CommitOutcome, IngestError>;
}

#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: Utf8PathBuf,
    identity: Option<CommitIdentity>,
}

impl GitRepo {
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, IngestError> {
        let unresolved = Self {
            root: path.as_ref().to_path_buf(),
            identity: None,
        };
        let toplevel = unresolved.git(&["rev-parse", "--show-toplevel"])?;
        Ok(Self {
            root: Utf8PathBuf::from(toplevel),
            identity: None,
        })
    }

    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some(CommitIdentity {
            name: name.into(),
            email: email.into(),
        });
        self
    }

    pub fn git_dir(&self) -> Result<PathBuf, IngestError> {
        self.git(&["rev-parse", "--absolute-git-dir"])
            .map(PathBuf::from)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(self.root.as_std_path());
        if let Some(identity) = &self.identity {
            cmd.arg("-c").arg(format!("user.name={}", identity.name));
            cmd.arg("-c").arg(format!("user.email={}", identity.email));
        }
        cmd.args(["-c", "core.quotepath=off"]);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Output, IngestError> {
        self.command(args).output().map_err(|err| IngestError::Vcs {
            command: args.first().copied().unwrap_or_default().to_string(),
            message: err.to_string(),
        })
    }

    fn git(&self, args: &[&str]) -> Result<String, IngestError> {
        self.git_raw(args).map(|stdout| stdout.trim().to_string())
    }

    fn git_raw(&self, args: &[&str]) -> Result<String, IngestError> {
        let output = self.run(args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(failure(args, &output))
    }

    fn tree_of(&self, rev: &str) -> Result<String, IngestError> {
        self.git(&["rev-parse", &format!("{rev}^{{tree}}")])
    }

    fn resolve_ref(&self, full_ref: &str) -> Result<Option<String>, IngestError> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", full_ref])?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()));
        }
        Ok(None)
    }

    fn resolve_commit(&self, rev: &str) -> Result<Option<String>, IngestError> {
        if let Some(tip) = self.branch_tip(rev)? {
            return Ok(Some(tip));
        }
        self.resolve_ref(&format!("{rev}^{{commit}}"))
    }

    fn status_paths(&self) -> Result<Vec<String>, IngestError> {
        let status = self.git_raw(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        let mut paths = Vec::new();
        let mut entries = status.split('\0').filter(|entry| !entry.is_empty());
        while let Some(entry) = entries.next() {
            let (code, path) = entry.split_at(entry.len().min(3));
            paths.push(path.to_string());
            // renames and copies carry their origin as a separate entry
            if code.starts_with('R') || code.starts_with('C') {
                entries.next();
            }
        }
        Ok(paths)
    }

    fn follow_branch(&self, branch: &str, old: &str, new: &str) -> Result<(), IngestError> {
        if self.current_branch().ok().as_deref() == Some(branch) {
            self.git(&["read-tree", "-m", "-u", old, new])?;
        }
        Ok(())
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, IngestError> {
        let output = self.git_raw(&["diff", "--name-only", "--diff-filter=U", "-z"])?;
        Ok(split_nul(&output))
    }
}

impl SnapshotRepo for GitRepo {
    type Workspace = GitWorkspace;

    fn worktree(&self) -> &Utf8Path {
        &self.root
    }

    fn current_branch(&self) -> Result<String, IngestError> {
        let output = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            return Err(IngestError::DetachedHead);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn dirty_paths(&self) -> Result<Vec<String>, IngestError> {
        let mut paths = self.status_paths()?;
        let git_dir = self.git_dir()?;
        for marker in [
            "MERGE_HEAD",
            "CHERRY_PICK_HEAD",
            "REVERT_HEAD",
            "rebase-merge",
            "rebase-apply",
        ] {
            if git_dir.join(marker).exists() {
                paths.push(format!("{marker} (operation in progress)"));
            }
        }
        Ok(paths)
    }

    fn branch_tip(&self, name: &str) -> Result<Option<String>, IngestError> {
        self.resolve_ref(&branch_ref(name))
    }

    fn tracked_files(&self, branch: &str) -> Result<Vec<Utf8PathBuf>, IngestError> {
        let listing =
            self.git_raw(&["ls-tree", "-r", "-z", "--name-only", &branch_ref(branch)])?;
        Ok(split_nul(&listing).into_iter().map(Utf8PathBuf::from).collect())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, IngestError> {
        let (Some(ancestor), Some(descendant)) =
            (self.resolve_commit(ancestor)?, self.resolve_commit(descendant)?)
        else {
            return Ok(false);
        };
        let args = ["merge-base", "--is-ancestor", ancestor.as_str(), descendant.as_str()];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure(&args, &output)),
        }
    }

    fn ensure_branch(&self, name: &str) -> Result<Branch, IngestError> {
        if let Some(tip) = self.branch_tip(name)? {
            return Ok(Branch {
                name: name.to_string(),
                tip,
                created: false,
            });
        }
        let empty_tree = self.git(&["mktree"])?;
        let message = format!("Start {name} snapshot branch");
        let root = self.git(&["commit-tree", &empty_tree, "-m", &message])?;
        // the empty old value makes update-ref refuse if the branch appeared meanwhile
        self.git(&["update-ref", &branch_ref(name), &root, ""])?;
        tracing::info!(branch = name, commit = %root, "created snapshot branch");
        Ok(Branch {
            name: name.to_string(),
            tip: root,
            created: true,
        })
    }

    fn derived_from(&self, branch: &str) -> Result<Option<String>, IngestError> {
        self.resolve_ref(&derived_ref(branch))
    }

    fn set_derived_from(&self, branch: &str, upstream_commit: &str) -> Result<(), IngestError> {
        self.git(&["update-ref", &derived_ref(branch), upstream_commit])?;
        Ok(())
    }

    fn open_workspace(&self) -> Result<GitWorkspace, IngestError> {
        let dir = tempfile::Builder::new()
            .prefix("kira-ingest-stage")
            .tempdir()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
            IngestError::Filesystem(format!("non-utf8 scratch path {}", path.display()))
        })?;
        self.git(&[
            "worktree",
            "add",
            "--quiet",
            "--detach",
            "--no-checkout",
            root.as_str(),
        ])?;
        tracing::debug!(path = %root, "opened scratch worktree");
        Ok(GitWorkspace {
            git: GitRepo {
                root,
                identity: self.identity.clone(),
            },
            main: self.clone(),
            held: None,
            _dir: dir,
        })
    }

    fn merge_into(&self, source: &str, target: &str) -> Result<MergeOutcome, IngestError> {
        let current = self.current_branch()?;
        if current != target {
            return Err(IngestError::WrongBranch {
                expected: target.to_string(),
                actual: current,
            });
        }
        if self.is_ancestor(source, target)? {
            return Ok(MergeOutcome::NoOp);
        }
        let message = format!("Merge {source} into {target}");
        let output = self.run(&[
            "merge",
            "--no-edit",
            "--no-ff",
            "--allow-unrelated-histories",
            "-m",
            &message,
            source,
        ])?;
        if output.status.success() {
            let commit_id = self.git(&["rev-parse", "HEAD"])?;
            return Ok(MergeOutcome::Merged { commit_id });
        }

        let paths = self.conflicted_paths().unwrap_or_default();
        if let Err(err) = self.git(&["merge", "--abort"]) {
            tracing::warn!(error = %err, "merge --abort failed");
        }
        if paths.is_empty() {
            return Err(failure(&["merge"], &output));
        }
        Ok(MergeOutcome::Conflict { paths })
    }
}

#[derive(Debug)]
pub struct GitWorkspace {
    git: GitRepo,
    main: GitRepo,
    held: Option<String>,
    _dir: TempDir,
}

impl SnapshotWorkspace for GitWorkspace {
    fn root(&self) -> &Utf8Path {
        &self.git.root
    }

    fn held_branch(&self) -> Option<&str> {
        self.held.as_deref()
    }

    fn checkout(&mut self, branch: &str) -> Result<(), IngestError> {
        if self.held.is_some() && !self.git.status_paths()?.is_empty() {
            return Err(IngestError::DirtyTree {
                branch: branch.to_string(),
            });
        }
        let tip = self.main.branch_tip(branch)?.ok_or_else(|| IngestError::Vcs {
            command: "checkout".to_string(),
            message: format!("branch {branch} does not exist"),
        })?;
        self.git
            .git(&["checkout", "--quiet", "--force", "--detach", &tip])?;
        self.held = Some(branch.to_string());
        Ok(())
    }

    fn commit_all(&self, branch: &str, message: &str) -> Result<CommitOutcome, IngestError> {
        if self.held.as_deref() != Some(branch) {
            return Err(IngestError::WrongBranch {
                expected: branch.to_string(),
                actual: self.held.clone().unwrap_or_else(|| "(nothing)".to_string()),
            });
        }
        let tip = self.main.branch_tip(branch)?.ok_or_else(|| IngestError::Vcs {
            command: "commit".to_string(),
            message: format!("branch {branch} has no commits"),
        })?;

        // --force: the user's ignore rules do not apply to snapshot content
        self.git.git(&["add", "--all", "--force", "."])?;
        let tree = self.git.git(&["write-tree"])?;
        if tree == self.git.tree_of(&tip)? {
            return Ok(CommitOutcome {
                changed: false,
                commit_id: tip,
            });
        }

        let commit = self
            .git
            .git(&["commit-tree", &tree, "-p", &tip, "-m", message])?;
        self.git.git(&[
            "update-ref",
            "-m",
            message,
            &branch_ref(branch),
            &commit,
            &tip,
        ])?;
        self.git.git(&["reset", "--quiet", "--soft", &commit])?;
        self.main.follow_branch(branch, &tip, &commit)?;
        Ok(CommitOutcome {
            changed: true,
            commit_id: commit,
        })
    }
}

impl Drop for GitWorkspace {
    fn drop(&mut self) {
        let removed = self
            .main
            .git(&["worktree", "remove", "--force", self.git.root.as_str()]);
        if let Err(err) = removed {
            tracing::warn!(path = %self.git.root, error = %err, "could not remove scratch worktree");
            let _ = self.main.git(&["worktree", "prune"]);
        }
    }
}

fn failure(args: &[&str], output: &Output) -> IngestError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    };
    IngestError::Vcs {
        command: args.first().copied().unwrap_or_default().to_string(),
        message,
    }
}

fn branch_ref(name: &str) -> String {
    format!("refs/heads/{name}")
}

fn derived_ref(branch: &str) -> String {
    format!("refs/kira-ingest/derived-from/{branch}")
}

fn split_nul(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

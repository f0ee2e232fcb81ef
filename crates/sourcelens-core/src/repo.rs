//! Repository fetching
//!
//! Clones or updates a remote repository into a scoped scratch directory at a
//! specific commit or branch. The scratch directory is released on every exit
//! path, including cancellation, via its Drop impl.

use crate::cancel::CancelToken;
use crate::error::{Error, FetchErrorKind, Result};
use crate::model::{JobKind, RepoRef};
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// A scratch directory that is deleted when dropped
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh scratch directory
    pub fn create() -> Result<Self> {
        let dir = TempDir::with_prefix("sourcelens-")?;
        Ok(Self { dir })
    }

    /// Path of the scratch directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A fetched working tree plus the metadata the pipeline needs
#[derive(Debug)]
pub struct FetchedSource {
    /// Scratch directory holding the working tree; dropped on job exit
    pub scratch: ScratchDir,
    /// Resolved HEAD commit of the working tree
    pub head_commit: String,
    /// Changed file paths (pr_scan only)
    pub changed_files: Vec<String>,
    /// Unified diff between base and head (pr_scan only)
    pub diff: Option<String>,
}

impl FetchedSource {
    /// Root of the working tree
    pub fn working_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Fetches repositories with the system `git`
#[derive(Debug, Default)]
pub struct RepoFetcher;

impl RepoFetcher {
    /// Create a fetcher
    pub fn new() -> Self {
        Self
    }

    /// Fetch the source a job refers to.
    ///
    /// For a full scan the requested branch (or pinned commit) is checked out
    /// at HEAD. For a PR scan both base and head commits are fetched, the
    /// working tree is left at head, and the changed-file list plus unified
    /// diff are computed.
    pub async fn fetch(
        &self,
        repo_ref: &RepoRef,
        kind: JobKind,
        cancel: &CancelToken,
    ) -> Result<FetchedSource> {
        let scratch = ScratchDir::create()?;
        let dest = scratch.path().to_path_buf();
        info!(url = %repo_ref.url, ?kind, "fetching repository");

        match kind {
            JobKind::FullScan => {
                self.clone_branch(repo_ref, &dest, cancel).await?;
                if let Some(commit) = &repo_ref.commit {
                    cancel.check("checkout")?;
                    run_git(&dest, &["checkout", "--detach", commit]).await?;
                }
                let head_commit = run_git(&dest, &["rev-parse", "HEAD"]).await?.trim().to_string();
                Ok(FetchedSource {
                    scratch,
                    head_commit,
                    changed_files: Vec::new(),
                    diff: None,
                })
            }
            JobKind::PrScan => {
                let pr = repo_ref.pr.as_ref().ok_or_else(|| {
                    Error::validation("repo_ref", "pr_scan job without pr metadata")
                })?;
                self.clone_branch(repo_ref, &dest, cancel).await?;

                cancel.check("fetch_pr_commits")?;
                run_git(&dest, &["fetch", "origin", &pr.base_sha, &pr.head_sha]).await?;
                run_git(&dest, &["checkout", "--detach", &pr.head_sha]).await?;

                cancel.check("compute_diff")?;
                let range = format!("{}...{}", pr.base_sha, pr.head_sha);
                let names = run_git(&dest, &["diff", "--name-only", &range]).await?;
                let changed_files: Vec<String> = names
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                let diff = run_git(&dest, &["diff", &range]).await?;

                Ok(FetchedSource {
                    scratch,
                    head_commit: pr.head_sha.clone(),
                    changed_files,
                    diff: Some(diff),
                })
            }
        }
    }

    async fn clone_branch(
        &self,
        repo_ref: &RepoRef,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check("clone")?;
        let dest_str = dest.to_string_lossy();
        let mut args: Vec<&str> = vec!["clone"];
        if let Some(branch) = &repo_ref.branch {
            args.extend(["--branch", branch.as_str()]);
        }
        // Pinned commits need history; branch-at-HEAD scans do not
        if repo_ref.commit.is_none() && repo_ref.pr.is_none() {
            args.extend(["--depth", "1"]);
        }
        args.push(&repo_ref.url);
        args.push(&dest_str);
        run_git(Path::new("."), &args).await?;
        debug!(dest = %dest.display(), "clone finished");
        Ok(())
    }
}

/// Run a git command, classifying failures into [`FetchErrorKind`]s
async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::fetch(FetchErrorKind::Other, format!("failed to spawn git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::fetch(
            FetchErrorKind::classify(&stderr),
            format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

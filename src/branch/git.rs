//! Version-control boundary.
//!
//! Local operations go through git2 on a blocking thread; `push` and PR
//! creation shell out to `git` and `gh` so the user's credential helpers
//! apply.

use crate::config::{FOREMAN_DIR, ensure_gitignore};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use git2::{BranchType, IndexAddOption, Repository, Signature, StashFlags, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait Vcs: Send + Sync {
    async fn current_branch(&self) -> Result<String>;

    /// Staged, modified or untracked files present.
    async fn has_changes(&self) -> Result<bool>;

    async fn stash(&self, message: &str) -> Result<()>;

    async fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Create a branch at HEAD without switching to it.
    async fn create_branch(&self, name: &str) -> Result<()>;

    async fn checkout(&self, name: &str) -> Result<()>;

    /// Stage everything and commit. Returns the short sha, or `None` when
    /// there was nothing to commit.
    async fn commit_all(&self, message: &str) -> Result<Option<String>>;

    /// Push with upstream tracking to `origin`.
    async fn push(&self, branch: &str) -> Result<()>;

    /// Run an arbitrary program in the repository, returning stdout.
    async fn run_command(&self, program: &str, args: &[String]) -> Result<String>;
}

pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Repository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut repo = Repository::open(&path)
                .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
            f(&mut repo)
        })
        .await
        .context("git task panicked")?
    }
}

fn is_foreman_path(path: &Path) -> bool {
    path.starts_with(FOREMAN_DIR)
}

fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Signature::now("foreman", "foreman@localhost").context("Failed to build signature"),
    }
}

#[async_trait]
impl Vcs for GitRepo {
    async fn current_branch(&self) -> Result<String> {
        self.with_repo(|repo| {
            let head = repo.head().context("Repository has no HEAD")?;
            if !head.is_branch() {
                bail!("HEAD is detached");
            }
            head.shorthand()
                .map(str::to_string)
                .context("Branch name is not valid UTF-8")
        })
        .await
    }

    async fn has_changes(&self) -> Result<bool> {
        self.with_repo(|repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true).include_ignored(false);
            let statuses = repo.statuses(Some(&mut opts))?;
            Ok(statuses
                .iter()
                .filter_map(|entry| entry.path().map(PathBuf::from))
                .any(|path| !is_foreman_path(&path)))
        })
        .await
    }

    async fn stash(&self, message: &str) -> Result<()> {
        let message = message.to_string();
        let foreman_dir = self.path.join(FOREMAN_DIR);
        if foreman_dir.is_dir() {
            ensure_gitignore(&foreman_dir)?;
        }
        self.with_repo(move |repo| {
            let sig = signature(repo)?;
            repo.stash_save(&sig, &message, Some(StashFlags::INCLUDE_UNTRACKED))
                .context("git stash failed")?;
            Ok(())
        })
        .await
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_repo(move |repo| Ok(repo.find_branch(&name, BranchType::Local).is_ok()))
            .await
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_repo(move |repo| {
            let head = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .context("Cannot branch from an unborn HEAD")?;
            repo.branch(&name, &head, false)
                .with_context(|| format!("Failed to create branch {}", name))?;
            Ok(())
        })
        .await
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_repo(move |repo| {
            let refname = format!("refs/heads/{}", name);
            let target = repo
                .revparse_single(&refname)
                .with_context(|| format!("Branch {} not found", name))?;
            repo.checkout_tree(&target, Some(git2::build::CheckoutBuilder::new().safe()))
                .with_context(|| format!("Failed to check out {}", name))?;
            repo.set_head(&refname)?;
            Ok(())
        })
        .await
    }

    async fn commit_all(&self, message: &str) -> Result<Option<String>> {
        let message = message.to_string();
        self.with_repo(move |repo| {
            let mut index = repo.index()?;
            let mut skip_state = |path: &Path, _: &[u8]| i32::from(is_foreman_path(path));
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, Some(&mut skip_state))?;
            index.update_all(["*"].iter(), Some(&mut skip_state))?;
            index.write()?;

            let tree_id = index.write_tree()?;
            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            if let Some(parent) = &parent
                && parent.tree_id() == tree_id
            {
                return Ok(None);
            }

            let tree = repo.find_tree(tree_id)?;
            let sig = signature(repo)?;
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
            Ok(Some(oid.to_string()[..7].to_string()))
        })
        .await
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.run_command(
            "git",
            &["push".into(), "-u".into(), "origin".into(), branch.to_string()],
        )
        .await
        .map(|_| ())
    }

    async fn run_command(&self, program: &str, args: &[String]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))?;

        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                program,
                args.first().map(String::as_str).unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

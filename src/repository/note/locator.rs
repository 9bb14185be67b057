//! Locator strings for git commit-note repositories.
//!
//! Accepted forms:
//!
//! - `file:///path/to/repo@<commit>` -- local repository
//! - `https://host/owner/repo@<commit>` -- remote over HTTP(S)
//! - `ssh://host/owner/repo@<commit>`, `git://...` -- remote
//! - `owner/repo@<commit>` -- GitHub shorthand
//!
//! The commit must be a full 40-hex SHA: notes are keyed by the exact
//! object id and abbreviations would make the sharded path ambiguous.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Error, Result};

fn commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[0-9a-f]{40}$").expect("static regex"))
}

/// How the repository is reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// A repository on the local filesystem.
    File,
    /// A repository behind a network remote.
    Remote,
}

/// A parsed note locator.
#[derive(Clone, Debug)]
pub struct NoteLocator {
    /// The locator as given (used in origin URIs).
    pub raw: String,
    /// Local or remote.
    pub transport: Transport,
    /// Clone URL for remote repositories.
    pub repo_url: String,
    /// Path for local repositories.
    pub repo_path: PathBuf,
    /// The commit the notes are attached to (full lowercase hex).
    pub commit: String,
}

impl NoteLocator {
    /// Parses a locator string.
    ///
    /// # Errors
    ///
    /// Fails when the commit is missing or is not a full 40-hex SHA, or
    /// the repository part matches none of the accepted forms.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidLocator(
                "unable to read note, no VCS locator set".to_string(),
            ));
        }

        let (repo_part, commit) = raw.rsplit_once('@').ok_or_else(|| {
            Error::InvalidLocator(format!("locator must specify a commit sha: {raw:?}"))
        })?;

        let commit = commit.to_lowercase();
        if !commit_re().is_match(&commit) {
            return Err(Error::InvalidLocator(format!(
                "commit must be a full 40-hex sha, got {commit:?}"
            )));
        }

        if let Some(path) = repo_part.strip_prefix("file://") {
            if path.is_empty() {
                return Err(Error::InvalidLocator("empty repository path".to_string()));
            }
            return Ok(Self {
                raw: raw.to_string(),
                transport: Transport::File,
                repo_url: String::new(),
                repo_path: PathBuf::from(path),
                commit,
            });
        }

        if repo_part.contains("://") {
            return Ok(Self {
                raw: raw.to_string(),
                transport: Transport::Remote,
                repo_url: repo_part.to_string(),
                repo_path: PathBuf::new(),
                commit,
            });
        }

        // owner/repo GitHub shorthand.
        match repo_part.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self {
                    raw: raw.to_string(),
                    transport: Transport::Remote,
                    repo_url: format!("https://github.com/{owner}/{repo}"),
                    repo_path: PathBuf::new(),
                    commit,
                })
            }
            _ => Err(Error::InvalidLocator(format!(
                "cannot parse repository from {repo_part:?}"
            ))),
        }
    }

    /// The sharded note path for the commit: `<sha[0:2]>/<sha[2:]>`.
    pub fn sharded_path(&self) -> String {
        format!("{}/{}", &self.commit[..2], &self.commit[2..])
    }

    /// The flat note path for the commit: the SHA at the tree root.
    pub fn flat_path(&self) -> &str {
        &self.commit
    }
}

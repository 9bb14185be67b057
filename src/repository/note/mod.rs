//! Git commit-notes attestation driver.
//!
//! Attestations ride in the repository's notes under `refs/notes/commits`:
//! one JSONL blob per commit, placed either at `<sha>` (flat layout) or
//! at `<sha[0:2]>/<sha[2:]>` (sharded layout). The collector reads
//! whichever layout holds data; the storer appends and follows the
//! repository's existing layout.
//!
//! Remote repositories are cloned shallow into a scratch directory and
//! only the notes refspec is fetched on top; a repository without the
//! notes ref simply has no attestations yet.

pub mod locator;
mod storer;

use std::sync::Arc;

use async_trait::async_trait;
use git2::build::RepoBuilder;
use tracing::debug;

use crate::attestation::{
    FetchOptions, PredicateType, Query, ResourceDescriptor, StoreOptions,
};
use crate::envelope::{self, Envelope};
use crate::errors::{Error, Result};
use crate::filters::{PredicateTypeMatcher, SubjectHashMatcher};

use self::locator::{NoteLocator, Transport};
use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "note";

/// The git ref holding commit notes.
pub const NOTES_REF: &str = "refs/notes/commits";

/// Author recorded on note commits.
pub const COMMIT_AUTHOR_NAME: &str = "Carabiner Collector";

/// Author email recorded on note commits.
pub const COMMIT_AUTHOR_EMAIL: &str = "noreply@carabiner.dev";

/// Factory building the driver from a locator init string.
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(NoteCollector::new(NoteOptions {
        locator: init.to_string(),
        push: None,
    })?))
}

/// Options for the note driver.
#[derive(Clone, Debug, Default)]
pub struct NoteOptions {
    /// Repository locator (see [`locator::NoteLocator`]).
    pub locator: String,
    /// Whether to push notes after storing. Defaults to pushing for
    /// remote repositories and not pushing for local `file://` ones.
    pub push: Option<bool>,
}

/// Reads and writes attestations in git commit notes.
pub struct NoteCollector {
    options: NoteOptions,
}

impl NoteCollector {
    /// Creates a collector, validating the locator eagerly.
    pub fn new(options: NoteOptions) -> Result<Self> {
        NoteLocator::parse(&options.locator)?;
        Ok(Self { options })
    }

    /// Creates a collector for a locator string with default options.
    pub fn for_locator(locator: impl Into<String>) -> Result<Self> {
        Self::new(NoteOptions {
            locator: locator.into(),
            push: None,
        })
    }

    /// Enables or disables pushing after a store.
    #[must_use]
    pub fn with_push(mut self, push: bool) -> Self {
        self.options.push = Some(push);
        self
    }

    fn locator(&self) -> Result<NoteLocator> {
        NoteLocator::parse(&self.options.locator)
    }

    /// Reads the commit's note bundle and parses it, rewriting each
    /// envelope's origin to `jsonl:<locator>#<line>`.
    fn read_bundle(locator: &NoteLocator) -> Result<Vec<Envelope>> {
        let (repo, _scratch) = open_or_clone(locator)?;
        let Some((data, _path, _sharded)) = read_note_blob(&repo, locator)? else {
            return Ok(Vec::new());
        };

        let mut ret = Vec::new();
        for (i, mut env) in envelope::jsonl::parse_indexed(&data)
            .map_err(|e| e.in_repository(format!("note: parsing bundle for {}", locator.raw)))?
        {
            let tag = format!("jsonl:{}#{i}", locator.raw);
            let digest = env
                .origin()
                .map(|rd| rd.digest.clone())
                .unwrap_or_default();
            env.set_origin(ResourceDescriptor {
                name: tag.clone(),
                uri: tag,
                digest,
            })?;
            ret.push(env);
        }
        Ok(ret)
    }

    async fn fetch_all(&self) -> Result<Vec<Envelope>> {
        let locator = self.locator()?;
        tokio::task::spawn_blocking(move || Self::read_bundle(&locator))
            .await
            .map_err(|err| Error::parse("note fetch task", err.to_string()))?
    }
}

#[async_trait]
impl Repository for NoteCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fetch: true,
            fetch_by_subject: true,
            fetch_by_predicate_type: true,
            store: true,
        }
    }

    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        self.fetch_all().await
    }

    async fn fetch_by_subject(
        &self,
        opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let all = self.fetch(opts).await?;
        let matcher = SubjectHashMatcher {
            hash_sets: subjects.iter().map(|s| s.digest.clone()).collect(),
        };
        Ok(Query::new().with_filter(Arc::new(matcher)).run(all))
    }

    async fn fetch_by_predicate_type(
        &self,
        opts: &FetchOptions,
        types: &[PredicateType],
    ) -> Result<Vec<Envelope>> {
        let all = self.fetch(opts).await?;
        let matcher = PredicateTypeMatcher {
            predicate_types: types.iter().cloned().collect(),
        };
        Ok(Query::new().with_filter(Arc::new(matcher)).run(all))
    }

    async fn store(&self, _opts: &StoreOptions, envelopes: &[Envelope]) -> Result<()> {
        let locator = self.locator()?;
        let push = self.options.push;
        let envelopes = envelopes.to_vec();
        tokio::task::spawn_blocking(move || storer::store(&locator, push, &envelopes))
            .await
            .map_err(|err| Error::parse("note store task", err.to_string()))?
    }
}

/// Opens a local repository or clones a remote one into a scratch
/// directory, fetching the notes refspec. The scratch guard must stay
/// alive while the repository is used.
pub(crate) fn open_or_clone(
    locator: &NoteLocator,
) -> Result<(git2::Repository, Option<tempfile::TempDir>)> {
    match locator.transport {
        Transport::File => {
            let repo = git2::Repository::open(&locator.repo_path).map_err(|source| Error::Git {
                context: format!("opening local repository {}", locator.repo_path.display()),
                source,
            })?;
            Ok((repo, None))
        }
        Transport::Remote => {
            let scratch = tempfile::tempdir().map_err(|source| Error::Io {
                context: "creating clone scratch directory".to_string(),
                source,
            })?;

            let mut fetch_opts = git2::FetchOptions::new();
            fetch_opts.depth(1);
            fetch_opts.remote_callbacks(remote_callbacks());
            let repo = RepoBuilder::new()
                .bare(true)
                .fetch_options(fetch_opts)
                .clone(&locator.repo_url, scratch.path())
                .map_err(|source| Error::Git {
                    context: format!("cloning repository {}", locator.repo_url),
                    source,
                })?;

            fetch_notes_ref(&repo, locator)?;
            Ok((repo, Some(scratch)))
        }
    }
}

/// Fetches `refs/notes/commits` from origin when the remote has it. A
/// missing remote ref means no attestations yet, not an error.
fn fetch_notes_ref(repo: &git2::Repository, locator: &NoteLocator) -> Result<()> {
    let mut remote = repo.find_remote("origin").map_err(|source| Error::Git {
        context: "getting remote".to_string(),
        source,
    })?;

    remote
        .connect(git2::Direction::Fetch)
        .map_err(|source| Error::Git {
            context: format!("connecting to {}", locator.repo_url),
            source,
        })?;
    let has_notes = remote
        .list()
        .map_err(|source| Error::Git {
            context: "listing remote refs".to_string(),
            source,
        })?
        .iter()
        .any(|head| head.name() == NOTES_REF);
    remote.disconnect().ok();

    if !has_notes {
        debug!("remote has no {NOTES_REF} ref yet");
        return Ok(());
    }

    let mut fetch_opts = git2::FetchOptions::new();
    fetch_opts.depth(1);
    fetch_opts.remote_callbacks(remote_callbacks());
    remote
        .fetch(
            &[&format!("+{NOTES_REF}:{NOTES_REF}")],
            Some(&mut fetch_opts),
            None,
        )
        .map_err(|source| Error::Git {
            context: "fetching notes".to_string(),
            source,
        })?;
    Ok(())
}

/// Credential callbacks delegating to the ambient ssh-agent and git
/// credential helpers.
pub(crate) fn remote_callbacks() -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(|url, username_from_url, allowed| {
        if allowed.contains(git2::CredentialType::SSH_KEY) {
            if let Some(username) = username_from_url {
                return git2::Cred::ssh_key_from_agent(username);
            }
        }
        if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) {
            if let Ok(config) = git2::Config::open_default() {
                return git2::Cred::credential_helper(&config, url, username_from_url);
            }
        }
        git2::Cred::default()
    });
    callbacks
}

/// Reads the note blob for the locator's commit, probing the sharded
/// path first and the flat path second. Returns the blob data, the path
/// it was found at, and whether that path was sharded; `None` when the
/// commit has no note (or the notes ref does not exist).
pub(crate) fn read_note_blob(
    repo: &git2::Repository,
    locator: &NoteLocator,
) -> Result<Option<(Vec<u8>, String, bool)>> {
    let tree = match notes_tree(repo)? {
        Some(tree) => tree,
        None => return Ok(None),
    };

    let sharded = locator.sharded_path();
    if let Some(data) = blob_at(repo, &tree, &sharded)? {
        return Ok(Some((data, sharded, true)));
    }

    let flat = locator.flat_path().to_string();
    if let Some(data) = blob_at(repo, &tree, &flat)? {
        return Ok(Some((data, flat, false)));
    }

    Ok(None)
}

/// Returns the tree of the notes ref tip, or `None` when the ref does
/// not exist.
pub(crate) fn notes_tree(repo: &git2::Repository) -> Result<Option<git2::Tree<'_>>> {
    let reference = match repo.find_reference(NOTES_REF) {
        Ok(reference) => reference,
        Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Git {
                context: "getting notes reference".to_string(),
                source,
            })
        }
    };
    let commit = reference.peel_to_commit().map_err(|source| Error::Git {
        context: "getting notes commit".to_string(),
        source,
    })?;
    let tree = commit.tree().map_err(|source| Error::Git {
        context: "getting notes tree".to_string(),
        source,
    })?;
    Ok(Some(tree))
}

/// Reads the blob at a path inside a tree, `None` when absent.
fn blob_at(repo: &git2::Repository, tree: &git2::Tree<'_>, path: &str) -> Result<Option<Vec<u8>>> {
    let entry = match tree.get_path(std::path::Path::new(path)) {
        Ok(entry) => entry,
        Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Git {
                context: format!("looking up note at {path}"),
                source,
            })
        }
    };
    let object = entry.to_object(repo).map_err(|source| Error::Git {
        context: format!("reading note object at {path}"),
        source,
    })?;
    match object.as_blob() {
        Some(blob) => Ok(Some(blob.content().to_vec())),
        None => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const COMMIT: &str = "e67eddfacbd2e8eefec191410bcce469079bc186";

    #[test]
    fn constructor_validates_the_locator() {
        assert!(NoteCollector::for_locator(format!("o/r@{COMMIT}")).is_ok());
        assert!(NoteCollector::for_locator("o/r@notacommit").is_err());
        assert!(NoteCollector::for_locator("").is_err());
    }

    #[test]
    fn capabilities_cover_all_operations() {
        let collector = NoteCollector::for_locator(format!("o/r@{COMMIT}")).unwrap();
        let caps = collector.capabilities();
        assert!(caps.fetch && caps.fetch_by_subject && caps.fetch_by_predicate_type);
        assert!(caps.store);
    }

    #[tokio::test]
    async fn missing_local_repository_is_an_error() {
        let collector =
            NoteCollector::for_locator(format!("file:///nonexistent/repo@{COMMIT}")).unwrap();
        assert!(collector.fetch(&FetchOptions::default()).await.is_err());
    }
}

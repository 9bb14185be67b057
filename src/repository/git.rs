//! Git repository attestation collector.
//!
//! Shallow-clones a repository into a scratch directory and hands the
//! checkout to the filesystem collector, so any attestation files
//! committed to the tree are picked up with the usual extension
//! classification. The locator selects a ref and an optional in-repo
//! directory:
//!
//! ```text
//! https://host/owner/repo[@ref][#path/inside/repo]
//! ```
//!
//! This driver is not wired into the default factory registry (the
//! commit-notes driver covers the common git-hosted case); callers
//! register it explicitly:
//!
//! ```no_run
//! use creel::repository::{self, git};
//!
//! # fn main() -> creel::Result<()> {
//! repository::register_repository_type(git::TYPE_MONIKER, git::build)?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::attestation::{FetchOptions, PredicateType, ResourceDescriptor};
use crate::envelope::Envelope;
use crate::errors::{Error, Result};

use super::filesystem::FilesystemCollector;
use super::note::remote_callbacks;
use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "git";

/// Factory building the driver from a locator init string.
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(GitCollector::new(GitOptions::from_locator(init)?)))
}

/// Options for the git collector.
#[derive(Clone, Debug, Default)]
pub struct GitOptions {
    /// Clone URL.
    pub url: String,
    /// Directory inside the repository to scan; empty scans the root.
    pub path: String,
    /// Branch to check out; empty follows the remote HEAD.
    pub reference: String,
}

impl GitOptions {
    /// Parses a `scheme://host/path[@ref][#dir]` locator.
    pub fn from_locator(init: &str) -> Result<Self> {
        let parsed = url::Url::parse(init)
            .map_err(|err| Error::InvalidLocator(format!("parsing url {init:?}: {err}")))?;

        let (repo_path, reference) = match parsed.path().split_once('@') {
            Some((path, reference)) => (path, reference.to_string()),
            None => (parsed.path(), String::new()),
        };

        let url = format!(
            "{}://{}{repo_path}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
        );

        Ok(Self {
            url,
            path: parsed
                .fragment()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            reference,
        })
    }
}

/// Collects attestations committed to a git repository's tree.
pub struct GitCollector {
    options: GitOptions,
}

impl GitCollector {
    /// Creates a collector for the given options.
    pub fn new(options: GitOptions) -> Self {
        Self { options }
    }

    fn clone_repo(options: &GitOptions, target: &Path) -> Result<()> {
        let mut fetch_opts = git2::FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks());
        // Shallow fetches are a wire-protocol feature; local clones get
        // the full history.
        if !options.url.starts_with("file://") {
            fetch_opts.depth(1);
        }

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        if !options.reference.is_empty() {
            builder.branch(&options.reference);
        }
        builder
            .clone(&options.url, target)
            .map_err(|source| Error::Git {
                context: format!("cloning repo {}", options.url),
                source,
            })?;
        Ok(())
    }

    /// Clones the repository and returns a filesystem collector over the
    /// checkout. The scratch guard keeps the clone alive for the call.
    async fn materialize(&self) -> Result<(tempfile::TempDir, FilesystemCollector)> {
        let scratch = tempfile::tempdir().map_err(|source| Error::Io {
            context: "creating clone scratch directory".to_string(),
            source,
        })?;

        let options = self.options.clone();
        let target = scratch.path().to_path_buf();
        tokio::task::spawn_blocking(move || Self::clone_repo(&options, &target))
            .await
            .map_err(|err| Error::parse("git clone task", err.to_string()))??;
        debug!("cloned {} for filesystem scan", self.options.url);

        let root = if self.options.path.is_empty() {
            scratch.path().to_path_buf()
        } else {
            scratch.path().join(&self.options.path)
        };
        Ok((scratch, FilesystemCollector::new(root)))
    }
}

#[async_trait]
impl Repository for GitCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::fetch_all()
    }

    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<Envelope>> {
        let (_guard, collector) = self.materialize().await?;
        collector.fetch(opts).await
    }

    async fn fetch_by_subject(
        &self,
        opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let (_guard, collector) = self.materialize().await?;
        collector.fetch_by_subject(opts, subjects).await
    }

    async fn fetch_by_predicate_type(
        &self,
        opts: &FetchOptions,
        types: &[PredicateType],
    ) -> Result<Vec<Envelope>> {
        let (_guard, collector) = self.materialize().await?;
        collector.fetch_by_predicate_type(opts, types).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const STATEMENT: &str = r#"{"_type":"https://in-toto.io/Statement/v1","subject":[{"name":"a","digest":{"sha256":"8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9"}}],"predicateType":"https://example.com/t/v1","predicate":{"x":1}}"#;

    #[test]
    fn locator_splits_url_ref_and_path() {
        let opts =
            GitOptions::from_locator("https://github.com/example/project@main#attestations")
                .unwrap();
        assert_eq!(opts.url, "https://github.com/example/project");
        assert_eq!(opts.reference, "main");
        assert_eq!(opts.path, "attestations");
    }

    #[test]
    fn locator_ref_and_path_are_optional() {
        let opts = GitOptions::from_locator("https://github.com/example/project").unwrap();
        assert_eq!(opts.url, "https://github.com/example/project");
        assert!(opts.reference.is_empty());
        assert!(opts.path.is_empty());
    }

    #[test]
    fn locator_accepts_file_urls() {
        let opts = GitOptions::from_locator("file:///tmp/some/repo#sub/dir").unwrap();
        assert_eq!(opts.url, "file:///tmp/some/repo");
        assert_eq!(opts.path, "sub/dir");
    }

    #[test]
    fn bad_locator_is_rejected() {
        assert!(GitOptions::from_locator("not a url").is_err());
    }

    /// Builds a source repository with one committed attestation file.
    fn init_source_repo(dir: &Path) {
        let repo = git2::Repository::init(dir).unwrap();
        std::fs::write(dir.join("att.json"), STATEMENT).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("att.json")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = git2::Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "add attestation", &tree, &[])
            .unwrap();
    }

    #[tokio::test]
    async fn clones_and_scans_the_checkout() {
        let source = tempfile::tempdir().unwrap();
        init_source_repo(source.path());

        let options =
            GitOptions::from_locator(&format!("file://{}", source.path().display())).unwrap();
        let collector = GitCollector::new(options);
        let envelopes = collector.fetch(&FetchOptions::default()).await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(
            envelopes[0].statement().unwrap().predicate_type,
            "https://example.com/t/v1".into()
        );
    }

    #[tokio::test]
    async fn subject_scoping_applies_to_the_checkout() {
        let source = tempfile::tempdir().unwrap();
        init_source_repo(source.path());

        let options =
            GitOptions::from_locator(&format!("file://{}", source.path().display())).unwrap();
        let collector = GitCollector::new(options);

        let miss = collector
            .fetch_by_subject(
                &FetchOptions::default(),
                &[ResourceDescriptor::new().with_digest("sha256", "0000")],
            )
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn missing_remote_is_an_error() {
        let options = GitOptions::from_locator("file:///nonexistent/repository").unwrap();
        let collector = GitCollector::new(options);
        assert!(collector.fetch(&FetchOptions::default()).await.is_err());
    }
}

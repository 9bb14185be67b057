//! JSONL bundle file collector.
//!
//! Reads attestations from one or more line-delimited JSON files,
//! parsing the files with bounded parallelism. Every envelope's origin
//! is rewritten to `jsonl:<path>#<line>` while preserving the content
//! digest the parser recorded.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::attestation::{FetchOptions, Query, ResourceDescriptor};
use crate::envelope::{self, Envelope};
use crate::errors::{Error, Result};
use crate::filters::SubjectHashMatcher;
use crate::fs_guard;

use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "jsonl";

/// Default number of files parsed in parallel.
pub const DEFAULT_MAX_PARALLEL: usize = 2;

/// Factory building the driver from an init string (a bundle path).
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(JsonlCollector::new([init])))
}

/// Collects attestations from JSONL bundle files.
pub struct JsonlCollector {
    paths: Vec<PathBuf>,
    max_parallel: usize,
}

impl JsonlCollector {
    /// Creates a collector over a set of bundle paths.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Adds a bundle path, skipping duplicates.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Sets the file-level parallelism bound.
    #[must_use]
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    fn parse_bundle_file(path: &PathBuf) -> Result<Vec<Envelope>> {
        let data = fs_guard::read_validated(path, fs_guard::MAX_ATTESTATION_BYTES)
            .map_err(|e| e.in_repository(format!("jsonl: opening {}", path.display())))?;

        let mut ret = Vec::new();
        for (i, mut env) in envelope::jsonl::parse_indexed(&data)? {
            let locator = format!("jsonl:{}#{i}", path.display());
            let digest = env
                .origin()
                .map(|rd| rd.digest.clone())
                .unwrap_or_default();
            env.set_origin(ResourceDescriptor {
                name: locator.clone(),
                uri: locator,
                digest,
            })?;
            ret.push(env);
        }
        Ok(ret)
    }

    async fn read_attestations(&self, query: Option<&Query>) -> Result<Vec<Envelope>> {
        let results: Vec<Vec<Envelope>> = stream::iter(self.paths.clone().into_iter().map(|path| {
            tokio::task::spawn_blocking(move || Self::parse_bundle_file(&path))
        }))
        .buffer_unordered(self.max_parallel)
        .map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(Error::parse("jsonl parse task", err.to_string())),
        })
        .try_collect()
        .await?;

        let mut ret: Vec<Envelope> = results.into_iter().flatten().collect();
        if let Some(query) = query {
            ret = query.run(ret);
        }
        Ok(ret)
    }
}

#[async_trait]
impl Repository for JsonlCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fetch: true,
            fetch_by_subject: true,
            fetch_by_predicate_type: false,
            store: false,
        }
    }

    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        self.read_attestations(None).await
    }

    async fn fetch_by_subject(
        &self,
        _opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let matcher = SubjectHashMatcher {
            hash_sets: subjects.iter().map(|s| s.digest.clone()).collect(),
        };
        let query = Query::new().with_filter(Arc::new(matcher));
        self.read_attestations(Some(&query)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const STATEMENT: &str = r#"{"_type":"https://in-toto.io/Statement/v1","subject":[{"name":"a","digest":{"sha256":"8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9"}}],"predicateType":"https://example.com/t/v1","predicate":{"x":1}}"#;

    #[tokio::test]
    async fn reads_bundles_and_rewrites_origins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atts.jsonl");
        std::fs::write(&path, format!("{STATEMENT}\nbroken line\n{STATEMENT}\n")).unwrap();

        let collector = JsonlCollector::new([&path]);
        let envelopes = collector.fetch(&FetchOptions::default()).await.unwrap();
        assert_eq!(envelopes.len(), 2);

        let origin = envelopes[0].origin().unwrap();
        assert!(origin.uri.starts_with("jsonl:"));
        assert!(origin.uri.ends_with("#0") || origin.uri.ends_with("#2"));
        // The content digest recorded by the parser survives the rewrite.
        assert_eq!(
            origin.digest.get("sha256").unwrap(),
            &crate::hasher::sha256_hex(STATEMENT.as_bytes())
        );
    }

    #[tokio::test]
    async fn subject_fetch_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atts.jsonl");
        std::fs::write(&path, format!("{STATEMENT}\n")).unwrap();
        let collector = JsonlCollector::new([&path]);

        let hit = collector
            .fetch_by_subject(
                &FetchOptions::default(),
                &[ResourceDescriptor::new().with_digest(
                    "sha256",
                    "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9",
                )],
            )
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

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
    async fn predicate_type_fetch_is_not_implemented() {
        let collector = JsonlCollector::new(Vec::<PathBuf>::new());
        let err = collector
            .fetch_by_predicate_type(&FetchOptions::default(), &["t".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetcherMethodNotImplemented));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let collector = JsonlCollector::new(["/nonexistent/bundle.jsonl"]);
        assert!(collector.fetch(&FetchOptions::default()).await.is_err());
    }
}

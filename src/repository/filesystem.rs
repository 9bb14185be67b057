//! Filesystem attestation collector.
//!
//! Walks a directory tree and parses every file carrying an
//! attestation-bearing extension. `.jsonl` files go through the JSONL
//! parser; everything else through the format sniffer. Reads are
//! symlink-checked and size-bounded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::attestation::{FetchOptions, PredicateType, Query, ResourceDescriptor};
use crate::envelope::{self, Envelope};
use crate::errors::{Error, Result};
use crate::filters::{PredicateTypeMatcher, SubjectHashMatcher};
use crate::fs_guard;

use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "fs";

/// Default extensions considered attestation-bearing.
pub const DEFAULT_EXTENSIONS: &[&str] = &["json", "jsonl", "spdx", "cdx", "bundle"];

/// Factory building the driver from an init string (the root path).
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(FilesystemCollector::new(init)))
}

/// Collects attestations from a directory tree.
pub struct FilesystemCollector {
    root: PathBuf,
    extensions: Vec<String>,
    ignore_other_files: bool,
}

impl FilesystemCollector {
    /// Creates a collector rooted at `path` with the default extension
    /// list.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            ignore_other_files: true,
        }
    }

    /// Replaces the extension allowlist.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Controls whether files outside the extension allowlist are
    /// skipped (default) or parsed anyway.
    #[must_use]
    pub fn with_ignore_other_files(mut self, ignore: bool) -> Self {
        self.ignore_other_files = ignore;
        self
    }

    fn scan(root: &Path, extensions: &[String], ignore_other: bool, opts: &FetchOptions) -> Result<Vec<Envelope>> {
        let mut ret = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|err| {
                Error::parse(format!("scanning {}", root.display()), err.to_string())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ignore_other && !extensions.iter().any(|e| e == &ext) {
                continue;
            }

            let data = fs_guard::read_validated(path, fs_guard::MAX_ATTESTATION_BYTES)?;

            let mut envelopes = if ext == "jsonl" {
                envelope::jsonl::parse(&data)
            } else {
                envelope::parse(&data)
            }
            .map_err(|e| Error::parse(format!("file {}", path.display()), e.to_string()))?;

            if let Some(query) = &opts.query {
                envelopes = query.run(envelopes);
            }
            ret.append(&mut envelopes);
        }

        Ok(ret)
    }

    async fn scan_async(&self, opts: &FetchOptions) -> Result<Vec<Envelope>> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        let ignore_other = self.ignore_other_files;
        let opts = opts.clone();
        tokio::task::spawn_blocking(move || Self::scan(&root, &extensions, ignore_other, &opts))
            .await
            .map_err(|err| Error::parse("filesystem scan task", err.to_string()))?
    }

    fn with_appended_filter(
        opts: &FetchOptions,
        filter: Arc<dyn crate::attestation::Filter>,
    ) -> FetchOptions {
        let mut opts = opts.clone();
        let query = opts.query.take().unwrap_or_else(Query::new);
        opts.query = Some(query.with_filter(filter));
        opts
    }
}

#[async_trait]
impl Repository for FilesystemCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::fetch_all()
    }

    async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<Envelope>> {
        self.scan_async(opts).await
    }

    async fn fetch_by_subject(
        &self,
        opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let matcher = SubjectHashMatcher {
            hash_sets: subjects.iter().map(|s| s.digest.clone()).collect(),
        };
        let opts = Self::with_appended_filter(opts, Arc::new(matcher));
        self.scan_async(&opts).await
    }

    async fn fetch_by_predicate_type(
        &self,
        opts: &FetchOptions,
        types: &[PredicateType],
    ) -> Result<Vec<Envelope>> {
        let matcher = PredicateTypeMatcher {
            predicate_types: types.iter().cloned().collect(),
        };
        let opts = Self::with_appended_filter(opts, Arc::new(matcher));
        self.scan_async(&opts).await
    }
}

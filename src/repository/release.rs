//! GitHub release asset collector.
//!
//! Downloads the attestation-bearing assets of a release (by tag, or the
//! latest release) into a scratch directory and delegates collection to
//! the filesystem driver, the same composition the release store uses
//! for publishing: attestations ride along as ordinary release assets.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::attestation::{FetchOptions, PredicateType, ResourceDescriptor};
use crate::envelope::Envelope;
use crate::errors::{Error, Result};

use super::filesystem::FilesystemCollector;
use super::github::{API_URL_ENV_VAR, DEFAULT_API_URL, TOKEN_ENV_VAR};
use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "release";

/// Asset extensions worth downloading.
pub const ASSET_EXTENSIONS: &[&str] = &[
    "jsonl", "json", "spdx", "cdx", "bundle", "sig", "crt", "key", "pub", "pem",
];

/// Factory building the driver from an `owner/repo@tag` init string.
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(ReleaseCollector::new(init)?))
}

#[derive(Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

/// Collects attestations from a GitHub release's assets.
pub struct ReleaseCollector {
    owner: String,
    repo: String,
    tag: String,
    api_base: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ReleaseCollector {
    /// Creates a collector from `owner/repo@tag`. A missing tag means
    /// the latest release.
    pub fn new(locator: &str) -> Result<Self> {
        let (repo_spec, tag) = match locator.split_once('@') {
            Some((repo, tag)) if !tag.is_empty() => (repo, tag.to_string()),
            Some((repo, _)) => (repo, "latest".to_string()),
            None => (locator, "latest".to_string()),
        };
        let (owner, repo) = repo_spec
            .trim_start_matches("https://github.com/")
            .split_once('/')
            .ok_or_else(|| {
                Error::InvalidLocator(format!("expected owner/repo@tag, got {locator:?}"))
            })?;
        if owner.is_empty() || repo.is_empty() {
            return Err(Error::InvalidLocator("no repository URL set".to_string()));
        }

        let api_base = std::env::var(API_URL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .user_agent(super::http::USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|source| Error::Http {
                context: "building release client".to_string(),
                source,
            })?;

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag,
            api_base,
            token,
            client,
        })
    }

    fn wants_asset(name: &str) -> bool {
        Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut builder = self.client.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await.map_err(|source| Error::Http {
            context: format!("requesting {url}"),
            source,
        })?;
        if !response.status().is_success() {
            return Err(Error::parse(
                format!("requesting {url}"),
                format!("HTTP error {}", response.status()),
            ));
        }
        Ok(response)
    }

    /// Downloads the release's attestation-bearing assets into a scratch
    /// directory and returns a filesystem collector over it. The tempdir
    /// guard keeps the directory alive for the duration of the call.
    async fn materialize(&self) -> Result<(tempfile::TempDir, FilesystemCollector)> {
        let url = if self.tag == "latest" {
            format!(
                "{}/repos/{}/{}/releases/latest",
                self.api_base, self.owner, self.repo
            )
        } else {
            format!(
                "{}/repos/{}/{}/releases/tags/{}",
                self.api_base, self.owner, self.repo, self.tag
            )
        };

        let release: Release = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|source| Error::Http {
                context: "parsing release metadata".to_string(),
                source,
            })?;

        let dir = tempfile::tempdir().map_err(|source| Error::Io {
            context: "creating release scratch directory".to_string(),
            source,
        })?;

        for asset in release.assets.iter().filter(|a| Self::wants_asset(&a.name)) {
            debug!("downloading release asset {}", asset.name);
            let body = self
                .get(&asset.browser_download_url)
                .await?
                .bytes()
                .await
                .map_err(|source| Error::Http {
                    context: format!("downloading asset {}", asset.name),
                    source,
                })?;
            // Asset names come from the API; keep only the base name so
            // a crafted name cannot escape the scratch directory.
            let base = Path::new(&asset.name)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| asset.name.clone());
            std::fs::write(dir.path().join(base), &body).map_err(|source| Error::Io {
                context: format!("writing asset {}", asset.name),
                source,
            })?;
        }

        let collector = FilesystemCollector::new(dir.path());
        Ok((dir, collector))
    }
}

#[async_trait]
impl Repository for ReleaseCollector {
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

    #[test]
    fn locator_parses_owner_repo_and_tag() {
        let collector = ReleaseCollector::new("example/project@v1.2.3").unwrap();
        assert_eq!(collector.owner, "example");
        assert_eq!(collector.repo, "project");
        assert_eq!(collector.tag, "v1.2.3");
    }

    #[test]
    fn missing_tag_defaults_to_latest() {
        let collector = ReleaseCollector::new("example/project").unwrap();
        assert_eq!(collector.tag, "latest");
    }

    #[test]
    fn full_repo_url_is_accepted() {
        let collector = ReleaseCollector::new("https://github.com/example/project@v1").unwrap();
        assert_eq!(collector.owner, "example");
        assert_eq!(collector.repo, "project");
    }

    #[test]
    fn bare_owner_is_rejected() {
        assert!(ReleaseCollector::new("justowner").is_err());
        assert!(ReleaseCollector::new("").is_err());
    }

    #[test]
    fn asset_filter_selects_attestation_bearing_files() {
        assert!(ReleaseCollector::wants_asset("atts.jsonl"));
        assert!(ReleaseCollector::wants_asset("sbom.spdx"));
        assert!(ReleaseCollector::wants_asset("cert.pem"));
        assert!(!ReleaseCollector::wants_asset("binary.tar.gz"));
        assert!(!ReleaseCollector::wants_asset("README"));
    }
}

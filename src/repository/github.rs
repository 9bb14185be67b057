//! GitHub attestation store collector.
//!
//! Reads and writes the attestations GitHub keeps alongside a
//! repository. The API only serves lookups by subject digest, so the
//! unscoped fetch is intentionally unimplemented. Stores POST Sigstore
//! bundles back to the same endpoint.
//!
//! Authentication uses the token in `GITHUB_TOKEN` when present; the API
//! base defaults to `https://api.github.com` and honors
//! `GITHUB_API_URL` for GitHub Enterprise deployments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::attestation::{FetchOptions, ResourceDescriptor, StoreOptions};
use crate::envelope::bundle::{Bundle, BundleEnvelope};
use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::hasher;

use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "github";

/// Environment variable holding the API token.
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Environment variable overriding the API base URL.
pub const API_URL_ENV_VAR: &str = "GITHUB_API_URL";

/// Default API base.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Digest algorithms the attestation API accepts.
pub const SUPPORTED_ALGORITHMS: &[&str] = &["sha256", "sha512"];

/// Factory building the driver from an `owner/repo` init string.
pub fn build(init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(GithubCollector::new(init)?))
}

/// Collects attestations from the GitHub attestation store.
pub struct GithubCollector {
    owner: String,
    repo: String,
    api_base: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AttestationsResponse {
    #[serde(default)]
    attestations: Vec<AttestationRecord>,
}

#[derive(Deserialize)]
struct AttestationRecord {
    bundle: serde_json::Value,
}

impl GithubCollector {
    /// Creates a collector for `owner/repo` (or a bare owner for
    /// user-level lookups).
    pub fn new(repo_spec: &str) -> Result<Self> {
        let (owner, repo) = match repo_spec.split_once('/') {
            Some((owner, repo)) => (owner.to_string(), repo.to_string()),
            None => (String::new(), repo_spec.to_string()),
        };

        let api_base = std::env::var(API_URL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .user_agent(super::http::USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| Error::Http {
                context: "building github client".to_string(),
                source,
            })?;

        Ok(Self {
            owner,
            repo,
            api_base,
            token,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Fetches one page of attestations for a digest. Returns an empty
    /// list on 404 (no attestations for the subject).
    async fn fetch_from_url(&self, path: &str) -> Result<Vec<Envelope>> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|source| Error::Http {
                context: format!("calling github api at {path}"),
                source,
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Error::parse(
                format!("calling github api at {path}"),
                format!("HTTP error {}", response.status()),
            ));
        }

        let parsed: AttestationsResponse =
            response.json().await.map_err(|source| Error::Http {
                context: "parsing attestations response".to_string(),
                source,
            })?;

        let mut ret = Vec::new();
        for record in parsed.attestations {
            let raw = serde_json::to_vec(&record.bundle).map_err(|source| Error::Json {
                context: "re-encoding bundle".to_string(),
                source,
            })?;
            let bundle: Bundle =
                serde_json::from_value(record.bundle).map_err(|source| Error::Json {
                    context: "decoding attestation bundle".to_string(),
                    source,
                })?;
            let mut envelope = BundleEnvelope::new(bundle);
            envelope.set_origin(hasher::hash_bytes(&raw))?;
            ret.push(Envelope::Bundle(envelope));
        }
        debug!("github api returned {} attestations", ret.len());
        Ok(ret)
    }
}

#[async_trait]
impl Repository for GithubCollector {
    fn moniker(&self) -> &'static str {
        TYPE_MONIKER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fetch: false,
            fetch_by_subject: true,
            fetch_by_predicate_type: false,
            store: true,
        }
    }

    /// The API cannot enumerate attestations without a subject.
    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        Err(Error::FetcherMethodNotImplemented)
    }

    async fn fetch_by_subject(
        &self,
        _opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        if self.owner.is_empty() && self.repo.is_empty() {
            return Err(Error::parse("github fetch", "missing repository data"));
        }

        let mut digests = Vec::new();
        for subject in subjects {
            for (algo, value) in &subject.digest {
                let algo = algo.to_lowercase();
                if !SUPPORTED_ALGORITHMS.contains(&algo.as_str()) {
                    continue;
                }
                let digest = format!("{algo}:{value}");
                if !digests.contains(&digest) {
                    digests.push(digest);
                }
            }
        }

        let mut ret = Vec::new();
        for digest in digests {
            let path = if self.repo.is_empty() {
                format!("users/{}/attestations/{digest}", self.owner)
            } else {
                format!("repos/{}/{}/attestations/{digest}", self.owner, self.repo)
            };
            let mut envelopes = self
                .fetch_from_url(&path)
                .await
                .map_err(|e| e.in_repository("github: fetching attestations"))?;
            ret.append(&mut envelopes);
        }
        Ok(ret)
    }

    async fn store(&self, _opts: &StoreOptions, envelopes: &[Envelope]) -> Result<()> {
        for envelope in envelopes {
            let bundle = envelope.to_json_value()?;
            let payload = serde_json::json!({ "bundle": bundle });
            let path = format!("repos/{}/{}/attestations", self.owner, self.repo);
            let response = self
                .request(reqwest::Method::POST, &path)
                .json(&payload)
                .send()
                .await
                .map_err(|source| Error::Http {
                    context: "uploading attestation bundle".to_string(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(Error::parse(
                    "uploading attestation bundle",
                    format!("HTTP error {}", response.status()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn init_string_splits_owner_and_repo() {
        let collector = GithubCollector::new("carabiner-dev/collector").unwrap();
        assert_eq!(collector.owner, "carabiner-dev");
        assert_eq!(collector.repo, "collector");
    }

    #[test]
    fn capabilities_are_subject_fetch_and_store() {
        let collector = GithubCollector::new("o/r").unwrap();
        let caps = collector.capabilities();
        assert!(!caps.fetch);
        assert!(caps.fetch_by_subject);
        assert!(!caps.fetch_by_predicate_type);
        assert!(caps.store);
    }

    #[tokio::test]
    async fn unscoped_fetch_is_not_implemented() {
        let collector = GithubCollector::new("o/r").unwrap();
        let err = collector.fetch(&FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::FetcherMethodNotImplemented));
    }

    #[tokio::test]
    async fn missing_repository_data_is_an_error() {
        let collector = GithubCollector::new("").unwrap();
        let err = collector
            .fetch_by_subject(&FetchOptions::default(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing repository data"));
    }

    #[tokio::test]
    async fn unsupported_algorithms_are_skipped() {
        // Only a sha1 digest: nothing to query, no network touched.
        let collector = GithubCollector::new("o/r").unwrap();
        let envelopes = collector
            .fetch_by_subject(
                &FetchOptions::default(),
                &[ResourceDescriptor::new().with_digest("sha1", "aaaa")],
            )
            .await
            .unwrap();
        assert!(envelopes.is_empty());
    }
}

//! OSS Rebuild attestation collector.
//!
//! Google's OSS Rebuild project publishes rebuild attestations for
//! popular open-source packages in a public bucket. The collector
//! expands package-url subjects into bucket URLs and piggybacks on the
//! HTTP driver to fetch the JSONL bundles.
//!
//! Only `pkg:npm/...` purls are supported today; subjects with other
//! URIs are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

use crate::attestation::{FetchOptions, ResourceDescriptor};
use crate::envelope::Envelope;
use crate::errors::Result;

use super::http::{HttpCollector, HttpOptions};
use super::{Capabilities, Repository};

/// Scheme tag for this driver.
pub const TYPE_MONIKER: &str = "ossrebuild";

/// Base URL of the rebuild attestation bucket.
pub const BUCKET_URL: &str = "https://storage.googleapis.com/google-rebuild-attestations";

/// Factory. The driver takes no init string.
pub fn build(_init: &str) -> Result<Arc<dyn Repository>> {
    Ok(Arc::new(OssRebuildCollector::new()))
}

/// Collects rebuild attestations for purl-identified subjects.
#[derive(Default)]
pub struct OssRebuildCollector {}

impl OssRebuildCollector {
    /// Creates the collector.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A minimally parsed package URL.
struct Purl {
    package_type: String,
    namespace: String,
    name: String,
    version: String,
}

/// Parses `pkg:<type>/[<namespace>/]<name>@<version>`, percent-decoding
/// the path segments. Returns `None` for anything that does not look
/// like a purl.
fn parse_purl(uri: &str) -> Option<Purl> {
    let rest = uri.strip_prefix("pkg:")?;
    let (path, version) = rest.rsplit_once('@')?;
    if version.is_empty() {
        return None;
    }

    let mut segments = path.split('/').map(|s| {
        percent_decode_str(s)
            .decode_utf8()
            .map(|c| c.to_string())
            .unwrap_or_else(|_| s.to_string())
    });

    let package_type = segments.next()?;
    let mut parts: Vec<String> = segments.collect();
    let name = parts.pop()?;
    if name.is_empty() || package_type.is_empty() {
        return None;
    }

    Some(Purl {
        package_type,
        namespace: parts.join("/"),
        name,
        version: version.to_string(),
    })
}

/// Expands purl subjects into rebuild bucket URLs.
fn subjects_to_urls(subjects: &[ResourceDescriptor]) -> Vec<String> {
    let mut urls = Vec::new();
    for subject in subjects {
        if !subject.uri.contains("pkg:") {
            continue;
        }
        let Some(purl) = parse_purl(&subject.uri) else {
            continue;
        };

        match purl.package_type.as_str() {
            "npm" => {
                // Scoped packages keep the @scope in the directory but
                // flatten it into the tarball name.
                let (directory, filename) = if purl.namespace.is_empty() {
                    (purl.name.clone(), purl.name.clone())
                } else {
                    (
                        format!("{}/{}", purl.namespace, purl.name),
                        format!(
                            "{}-{}",
                            purl.namespace.trim_start_matches('@'),
                            purl.name
                        ),
                    )
                };
                urls.push(format!(
                    "{BUCKET_URL}/{}/{directory}/{}/{filename}-{}.tgz/rebuild.intoto.jsonl",
                    purl.package_type, purl.version, purl.version,
                ));
            }
            // Other ecosystems are not published yet.
            _ => continue,
        }
    }
    urls
}

#[async_trait]
impl Repository for OssRebuildCollector {
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

    /// There is no way to enumerate the bucket; the unscoped fetch
    /// returns nothing.
    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        Ok(Vec::new())
    }

    async fn fetch_by_subject(
        &self,
        opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let urls = subjects_to_urls(subjects);
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut options = HttpOptions::default().with_read_jsonl(true);
        for url in urls {
            options = options.with_url(url);
        }
        HttpCollector::new(options)?.fetch(opts).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subject_with_uri(uri: &str) -> ResourceDescriptor {
        ResourceDescriptor::new().with_uri(uri)
    }

    #[test]
    fn expands_scoped_npm_purl() {
        let urls = subjects_to_urls(&[subject_with_uri(
            "pkg:npm/%40tanstack/vue-virtual@3.5.0",
        )]);
        assert_eq!(
            urls,
            vec![
                "https://storage.googleapis.com/google-rebuild-attestations/npm/@tanstack/vue-virtual/3.5.0/tanstack-vue-virtual-3.5.0.tgz/rebuild.intoto.jsonl"
                    .to_string()
            ]
        );
    }

    #[test]
    fn expands_unscoped_npm_purl() {
        let urls = subjects_to_urls(&[subject_with_uri("pkg:npm/quick-lru@5.2.0")]);
        assert_eq!(
            urls,
            vec![
                "https://storage.googleapis.com/google-rebuild-attestations/npm/quick-lru/5.2.0/quick-lru-5.2.0.tgz/rebuild.intoto.jsonl"
                    .to_string()
            ]
        );
    }

    #[test]
    fn skips_non_purl_and_unsupported_types() {
        assert!(subjects_to_urls(&[subject_with_uri("https://example.com/a.tgz")]).is_empty());
        assert!(subjects_to_urls(&[subject_with_uri("pkg:pypi/requests@2.31.0")]).is_empty());
        assert!(subjects_to_urls(&[subject_with_uri("pkg:npm/missing-version")]).is_empty());
    }

    #[tokio::test]
    async fn unscoped_fetch_returns_nothing() {
        let collector = OssRebuildCollector::new();
        assert!(collector
            .fetch(&FetchOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn no_matching_subjects_short_circuits() {
        let collector = OssRebuildCollector::new();
        let envelopes = collector
            .fetch_by_subject(
                &FetchOptions::default(),
                &[subject_with_uri("https://example.com/a.tgz")],
            )
            .await
            .unwrap();
        assert!(envelopes.is_empty());
    }
}

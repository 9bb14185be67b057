//! The collector agent: multiplexes queries across repository drivers.
//!
//! The agent owns a list of drivers and the result cache. A query is
//! classified against each driver's capability set, fanned out to the
//! capable subset with bounded parallelism, and the per-driver results
//! are merged, filtered, and truncated.
//!
//! Failure policy for the fan-out path: any driver error fails the whole
//! operation and partial results are discarded. Merge order across
//! drivers follows task completion and is not part of the contract;
//! callers must treat the output as an unordered multiset.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::attestation::{FetchOptions, PredicateType, ResourceDescriptor, StoreOptions};
use crate::cache::MemoryCache;
use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::repository::{self, Repository};

/// Configuration knobs for the collector agent.
#[derive(Clone, Debug)]
pub struct AgentOptions {
    /// Fail subject/type queries when no fetch-capable driver is
    /// configured, instead of returning an empty set.
    pub fail_if_no_fetchers: bool,
    /// Consult and populate the in-memory cache.
    pub use_cache: bool,
    /// Bound on concurrent driver fetches.
    pub parallel_fetches: usize,
    /// Bound on concurrent driver stores.
    pub parallel_stores: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            fail_if_no_fetchers: false,
            use_cache: true,
            parallel_fetches: 4,
            parallel_stores: 4,
        }
    }
}

/// The attestation collector agent.
///
/// The agent exposes the fetcher and storer operations of the driver
/// contract; each call is forwarded to every configured driver that
/// declares the corresponding capability. Drivers are added during
/// setup; mutating the list after the first fetch is not supported.
pub struct Agent {
    /// Agent configuration.
    pub options: AgentOptions,
    cache: MemoryCache,
    repositories: Vec<Arc<dyn Repository>>,
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent {
    /// Creates an agent with default options and the default driver
    /// types loaded into the factory registry.
    pub fn new() -> Self {
        // Already-registered tags are fine here.
        let _ = repository::load_default_repository_types();
        Self::with_options(AgentOptions::default())
    }

    /// Creates an agent with a specific options set.
    pub fn with_options(options: AgentOptions) -> Self {
        let _ = repository::load_default_repository_types();
        Self {
            options,
            cache: MemoryCache::new(),
            repositories: Vec::new(),
        }
    }

    /// Adds repository drivers to the agent.
    pub fn add_repository(&mut self, repos: impl IntoIterator<Item = Arc<dyn Repository>>) {
        self.repositories.extend(repos);
    }

    /// Builds a driver from a `"<tag>:<init>"` locator and adds it.
    pub fn add_repository_from_string(&mut self, init: &str) -> Result<()> {
        let repo = repository::repository_from_string(init)
            .map_err(|e| e.in_repository("building repo"))?;
        self.repositories.push(repo);
        Ok(())
    }

    /// The configured drivers.
    pub fn repositories(&self) -> &[Arc<dyn Repository>] {
        &self.repositories
    }

    fn fetcher_repos(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories
            .iter()
            .filter(|r| r.capabilities().fetches())
            .cloned()
            .collect()
    }

    fn storer_repos(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories
            .iter()
            .filter(|r| r.capabilities().store)
            .cloned()
            .collect()
    }

    /// Runs the per-call closure against every driver in `repos` with
    /// bounded parallelism, merging results in completion order. Any
    /// driver error fails the whole fan-out.
    async fn fan_out<F>(&self, repos: Vec<Arc<dyn Repository>>, call: F) -> Result<Vec<Envelope>>
    where
        F: Fn(Arc<dyn Repository>) -> futures::future::BoxFuture<'static, Result<Vec<Envelope>>>,
    {
        let parallel = self.options.parallel_fetches.max(1);
        let mut stream = stream::iter(repos.into_iter().map(call)).buffer_unordered(parallel);

        let mut ret = Vec::new();
        while let Some(result) = stream.next().await {
            ret.extend(result?);
        }
        Ok(ret)
    }

    fn finish(opts: &FetchOptions, mut envelopes: Vec<Envelope>) -> Vec<Envelope> {
        if let Some(query) = &opts.query {
            envelopes = query.run(envelopes);
        }
        if opts.limit > 0 {
            envelopes.truncate(opts.limit);
        }
        envelopes
    }

    /// Fetches attestations from every fetch-capable driver, in the
    /// drivers' preferred order. The unscoped fetch has no cache path
    /// and always fails when no fetcher is configured.
    pub async fn fetch(&self, opts: &FetchOptions) -> Result<Vec<Envelope>> {
        let repos: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.capabilities().fetch)
            .cloned()
            .collect();
        if repos.is_empty() {
            return Err(Error::NoFetcherConfigured);
        }

        let call_opts = opts.clone();
        let merged = self
            .fan_out(repos, move |repo| {
                let opts = call_opts.clone();
                Box::pin(async move {
                    repo.fetch(&opts)
                        .await
                        .map_err(|e| e.in_repository(format!("{}: fetching", repo.moniker())))
                })
            })
            .await?;

        Ok(Self::finish(opts, merged))
    }

    /// Fetches all attestations about a list of subjects from every
    /// subject-capable driver, consulting the cache first.
    pub async fn fetch_by_subject(
        &self,
        opts: &FetchOptions,
        subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        let repos: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.capabilities().fetch_by_subject)
            .cloned()
            .collect();
        if repos.is_empty() {
            if self.options.fail_if_no_fetchers {
                return Err(Error::NoFetcherConfigured);
            }
            debug!("no fetcher repos configured");
            return Ok(Vec::new());
        }

        let mut ret = Vec::new();
        if self.options.use_cache {
            if let Some(cached) = self.cache.get_by_subject(subjects) {
                debug!("subject query answered from cache");
                ret = cached;
            }
        }

        if ret.is_empty() {
            let call_opts = opts.clone();
            let call_subjects: Vec<ResourceDescriptor> = subjects.to_vec();
            ret = self
                .fan_out(repos, move |repo| {
                    let opts = call_opts.clone();
                    let subjects = call_subjects.clone();
                    Box::pin(async move {
                        repo.fetch_by_subject(&opts, &subjects).await.map_err(|e| {
                            e.in_repository(format!("{}: fetching by subject", repo.moniker()))
                        })
                    })
                })
                .await?;

            if self.options.use_cache {
                self.cache.store_by_subject(subjects, &ret);
            }
        }

        Ok(Self::finish(opts, ret))
    }

    /// Fetches all attestations of the given predicate types from every
    /// type-capable driver, consulting the cache first.
    pub async fn fetch_by_predicate_type(
        &self,
        opts: &FetchOptions,
        types: &[PredicateType],
    ) -> Result<Vec<Envelope>> {
        let repos: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.capabilities().fetch_by_predicate_type)
            .cloned()
            .collect();
        if repos.is_empty() {
            if self.options.fail_if_no_fetchers {
                return Err(Error::NoFetcherConfigured);
            }
            debug!("no fetcher repos configured");
            return Ok(Vec::new());
        }

        let mut ret = Vec::new();
        if self.options.use_cache {
            if let Some(cached) = self.cache.get_by_predicate_type(types) {
                debug!("predicate-type query answered from cache");
                ret = cached;
            }
        }

        if ret.is_empty() {
            let call_opts = opts.clone();
            let call_types: Vec<PredicateType> = types.to_vec();
            ret = self
                .fan_out(repos, move |repo| {
                    let opts = call_opts.clone();
                    let types = call_types.clone();
                    Box::pin(async move {
                        repo.fetch_by_predicate_type(&opts, &types).await.map_err(|e| {
                            e.in_repository(format!(
                                "{}: fetching by predicate type",
                                repo.moniker()
                            ))
                        })
                    })
                })
                .await?;

            if self.options.use_cache {
                self.cache.store_by_predicate_type(types, &ret);
            }
        }

        Ok(Self::finish(opts, ret))
    }

    /// Stores envelopes through every store-capable driver with bounded
    /// parallelism. Any driver error fails the operation.
    pub async fn store(&self, opts: &StoreOptions, envelopes: &[Envelope]) -> Result<()> {
        let repos = self.storer_repos();
        if repos.is_empty() {
            return Err(Error::NoStorerConfigured);
        }

        let parallel = self.options.parallel_stores.max(1);
        let opts = opts.clone();
        let envelopes = envelopes.to_vec();

        let mut stream = stream::iter(repos.into_iter().map(|repo| {
            let opts = opts.clone();
            let envelopes = envelopes.clone();
            async move {
                repo.store(&opts, &envelopes)
                    .await
                    .map_err(|e| e.in_repository(format!("{}: storing", repo.moniker())))
            }
        }))
        .buffer_unordered(parallel);

        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    /// True when at least one driver can fetch.
    pub fn has_fetchers(&self) -> bool {
        !self.fetcher_repos().is_empty()
    }

    /// True when at least one driver can store.
    pub fn has_storers(&self) -> bool {
        !self.storer_repos().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::bare::BareEnvelope;
    use crate::repository::Capabilities;
    use async_trait::async_trait;

    /// Synthetic driver returning canned results.
    struct FakeRepo {
        envelopes: usize,
        fail: bool,
        capabilities: Capabilities,
    }

    impl FakeRepo {
        fn fetcher(envelopes: usize) -> Arc<dyn Repository> {
            Arc::new(Self {
                envelopes,
                fail: false,
                capabilities: Capabilities::fetch_all(),
            })
        }

        fn failing() -> Arc<dyn Repository> {
            Arc::new(Self {
                envelopes: 0,
                fail: true,
                capabilities: Capabilities::fetch_all(),
            })
        }

        fn result(&self) -> Result<Vec<Envelope>> {
            if self.fail {
                return Err(Error::parse("synthetic", "synth error"));
            }
            Ok((0..self.envelopes)
                .map(|_| Envelope::Bare(BareEnvelope::default()))
                .collect())
        }
    }

    #[async_trait]
    impl Repository for FakeRepo {
        fn moniker(&self) -> &'static str {
            "fake"
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
            self.result()
        }

        async fn fetch_by_subject(
            &self,
            _opts: &FetchOptions,
            _subjects: &[ResourceDescriptor],
        ) -> Result<Vec<Envelope>> {
            self.result()
        }

        async fn fetch_by_predicate_type(
            &self,
            _opts: &FetchOptions,
            _types: &[PredicateType],
        ) -> Result<Vec<Envelope>> {
            self.result()
        }
    }

    #[tokio::test]
    async fn fetch_merges_all_driver_results() {
        for (counts, expect) in [
            (vec![1], 1),
            (vec![1, 0], 1),
            (vec![2], 2),
            (vec![1, 1], 2),
            (vec![3, 2, 1], 6),
        ] {
            let mut agent = Agent::new();
            agent.add_repository(counts.iter().map(|n| FakeRepo::fetcher(*n)));
            let res = agent.fetch(&FetchOptions::default()).await.unwrap();
            assert_eq!(res.len(), expect, "counts {counts:?}");
        }
    }

    #[tokio::test]
    async fn any_driver_error_fails_the_operation() {
        let mut agent = Agent::new();
        agent.add_repository([FakeRepo::fetcher(1), FakeRepo::failing()]);
        assert!(agent.fetch(&FetchOptions::default()).await.is_err());
        assert!(agent
            .fetch_by_subject(&FetchOptions::default(), &[])
            .await
            .is_err());
        assert!(agent
            .fetch_by_predicate_type(&FetchOptions::default(), &["t".into()])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unscoped_fetch_requires_fetchers() {
        let agent = Agent::new();
        let err = agent.fetch(&FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::NoFetcherConfigured));
    }

    #[tokio::test]
    async fn scoped_queries_tolerate_missing_fetchers() {
        let agent = Agent::new();
        assert!(agent
            .fetch_by_subject(&FetchOptions::default(), &[])
            .await
            .unwrap()
            .is_empty());

        let mut strict = Agent::with_options(AgentOptions {
            fail_if_no_fetchers: true,
            ..AgentOptions::default()
        });
        strict.add_repository([]);
        assert!(matches!(
            strict.fetch_by_subject(&FetchOptions::default(), &[]).await,
            Err(Error::NoFetcherConfigured)
        ));
    }

    #[tokio::test]
    async fn subject_results_are_cached() {
        let mut agent = Agent::new();
        agent.add_repository([FakeRepo::fetcher(2)]);
        let subjects = vec![ResourceDescriptor::new().with_digest("sha256", "aaaa")];

        let first = agent
            .fetch_by_subject(&FetchOptions::default(), &subjects)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        // Swap in a failing driver: the cached entry answers the query
        // without touching it.
        let mut cached_agent = Agent::new();
        cached_agent.add_repository([FakeRepo::failing()]);
        cached_agent
            .cache
            .store_by_subject(&subjects, &first);
        let second = cached_agent
            .fetch_by_subject(&FetchOptions::default(), &subjects)
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn limit_truncates_merged_results() {
        let mut agent = Agent::new();
        agent.add_repository([FakeRepo::fetcher(5)]);
        let opts = FetchOptions::default().with_limit(3);
        let res = agent.fetch(&opts).await.unwrap();
        assert_eq!(res.len(), 3);
    }

    #[tokio::test]
    async fn store_requires_storers() {
        let mut agent = Agent::new();
        agent.add_repository([FakeRepo::fetcher(1)]);
        let err = agent
            .store(&StoreOptions::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoStorerConfigured));
    }
}

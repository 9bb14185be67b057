//! Repository driver contract and the driver factory registry.
//!
//! A repository is a backend holding attestations: a directory tree, an
//! HTTPS endpoint, a container registry, git commit notes, a release
//! asset store. Every driver implements a subset of the four operations;
//! the subset is declared at construction through [`Capabilities`] and
//! the agent classifies drivers by it before invoking, so the
//! [`Error::FetcherMethodNotImplemented`] sentinel is only reachable by
//! direct callers.
//!
//! Drivers are instantiated from locator strings (`"<tag>:<init>"`)
//! through a process-wide factory registry. The registry is populated
//! once at startup ([`load_default_repository_types`]) and is effectively
//! frozen afterwards; late registration must happen before the first
//! lookup race matters and duplicate tags are rejected. The [`git`]
//! tree-scan driver ships outside the default tag table and is
//! registered explicitly by callers that want it.

pub mod coci;
pub mod filesystem;
pub mod git;
pub mod github;
pub mod http;
pub mod jsonl;
pub mod note;
pub mod ossrebuild;
pub mod release;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;

use crate::attestation::{FetchOptions, PredicateType, ResourceDescriptor, StoreOptions};
use crate::envelope::Envelope;
use crate::errors::{Error, Result};

/// The operations a driver supports, declared at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Unscoped fetch.
    pub fetch: bool,
    /// Fetch scoped by subject.
    pub fetch_by_subject: bool,
    /// Fetch scoped by predicate type.
    pub fetch_by_predicate_type: bool,
    /// Store.
    pub store: bool,
}

impl Capabilities {
    /// Capabilities of a read-only driver implementing every fetch
    /// variant.
    pub const fn fetch_all() -> Self {
        Self {
            fetch: true,
            fetch_by_subject: true,
            fetch_by_predicate_type: true,
            store: false,
        }
    }

    /// Returns true when any fetch variant is supported.
    pub fn fetches(&self) -> bool {
        self.fetch || self.fetch_by_subject || self.fetch_by_predicate_type
    }
}

/// The uniform driver contract.
///
/// Default method bodies return the not-implemented sentinel so drivers
/// only write the operations they declare. Cancellation is structural:
/// dropping the returned future aborts the call.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The short scheme tag identifying the driver type (`fs`, `note`,
    /// ...), used in error context.
    fn moniker(&self) -> &'static str;

    /// The declared capability set.
    fn capabilities(&self) -> Capabilities;

    /// Fetches all attestations in the driver's preferred order.
    async fn fetch(&self, _opts: &FetchOptions) -> Result<Vec<Envelope>> {
        Err(Error::FetcherMethodNotImplemented)
    }

    /// Fetches all attestations about the given subjects.
    async fn fetch_by_subject(
        &self,
        _opts: &FetchOptions,
        _subjects: &[ResourceDescriptor],
    ) -> Result<Vec<Envelope>> {
        Err(Error::FetcherMethodNotImplemented)
    }

    /// Fetches all attestations with one of the given predicate types.
    async fn fetch_by_predicate_type(
        &self,
        _opts: &FetchOptions,
        _types: &[PredicateType],
    ) -> Result<Vec<Envelope>> {
        Err(Error::FetcherMethodNotImplemented)
    }

    /// Writes envelopes into the backend.
    async fn store(&self, _opts: &StoreOptions, _envelopes: &[Envelope]) -> Result<()> {
        Err(Error::FetcherMethodNotImplemented)
    }
}

impl std::fmt::Debug for dyn Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("moniker", &self.moniker()).finish()
    }
}

/// Builds a driver from the init string following the scheme tag.
pub type RepositoryFactory = fn(&str) -> Result<Arc<dyn Repository>>;

static FACTORIES: OnceLock<Mutex<HashMap<String, RepositoryFactory>>> = OnceLock::new();

fn factories() -> &'static Mutex<HashMap<String, RepositoryFactory>> {
    FACTORIES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a new driver type under a scheme tag.
///
/// # Errors
///
/// Returns [`Error::TypeAlreadyRegistered`] when the tag is taken.
pub fn register_repository_type(moniker: &str, factory: RepositoryFactory) -> Result<()> {
    let mut map = factories()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if map.contains_key(moniker) {
        return Err(Error::TypeAlreadyRegistered);
    }
    map.insert(moniker.to_string(), factory);
    Ok(())
}

/// Removes a driver type registration.
pub fn unregister_repository_type(moniker: &str) {
    factories()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .remove(moniker);
}

/// Loads the built-in driver types into the registry. Tags that are
/// already present are left as they are.
pub fn load_default_repository_types() -> Result<()> {
    let defaults: [(&str, RepositoryFactory); 9] = [
        (coci::TYPE_MONIKER, coci::build),
        (filesystem::TYPE_MONIKER, filesystem::build),
        (github::TYPE_MONIKER, github::build),
        (http::TYPE_MONIKER, http::build_http),
        (http::TYPE_MONIKER_HTTPS, http::build_https),
        (jsonl::TYPE_MONIKER, jsonl::build),
        (note::TYPE_MONIKER, note::build),
        (ossrebuild::TYPE_MONIKER, ossrebuild::build),
        (release::TYPE_MONIKER, release::build),
    ];

    let mut errs = Vec::new();
    for (moniker, factory) in defaults {
        match register_repository_type(moniker, factory) {
            Ok(()) | Err(Error::TypeAlreadyRegistered) => {}
            Err(err) => errs.push(err),
        }
    }
    match Error::join(errs) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Builds a driver from a `"<tag>:<init>"` locator string. Everything
/// after the first colon is passed uninterpreted to the factory.
pub fn repository_from_string(init: &str) -> Result<Arc<dyn Repository>> {
    let (tag, rest) = match init.split_once(':') {
        Some((tag, rest)) => (tag, rest),
        None => (init, ""),
    };

    let factory = {
        let map = factories()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(tag).copied()
    };

    match factory {
        Some(factory) => factory(rest),
        None => Err(Error::UnknownRepositoryType(tag.to_string())),
    }
}

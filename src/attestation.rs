//! Core attestation data model shared by parsers, drivers, and the agent.
//!
//! The types here are the vocabulary of the whole crate: subjects
//! ([`ResourceDescriptor`]), predicate type URIs ([`PredicateType`]),
//! signatures and verification results, and the option/query types that
//! flow into every repository driver call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::envelope::Envelope;

/// The in-toto v1 statement type URI.
pub const STATEMENT_TYPE_URI: &str = "https://in-toto.io/Statement/v1";

/// A predicate type URI, e.g. `https://slsa.dev/provenance/v1`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredicateType(pub String);

impl PredicateType {
    /// Returns true when the URI is empty (no predicate type declared).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PredicateType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PredicateType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PredicateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a software artifact: the in-toto resource descriptor.
///
/// Doubles as the statement subject and as the provenance record of the
/// bytes an envelope was parsed from (`predicate.origin`). The digest map
/// is keyed by lowercase algorithm name (`sha1`, `sha256`, `sha512`, ...);
/// a `BTreeMap` keeps the ordering deterministic for serialization and
/// cache-key construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Artifact name, empty when unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Artifact URI, empty when unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,

    /// Digest map: algorithm name to hex value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digest: BTreeMap<String, String>,
}

impl ResourceDescriptor {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name, builder style.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the URI, builder style.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Adds a digest under `algo`. An algorithm already present in this
    /// descriptor is never overwritten.
    #[must_use]
    pub fn with_digest(mut self, algo: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_digest(algo, value);
        self
    }

    /// Adds a digest under `algo` unless the algorithm is already present.
    pub fn add_digest(&mut self, algo: impl Into<String>, value: impl Into<String>) {
        self.digest.entry(algo.into()).or_insert_with(|| value.into());
    }
}

/// A single signature carried by an envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    /// Optional key identifier.
    pub keyid: String,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

/// An identity matched during signature verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Identity {
    /// A plain public-key identity.
    #[serde(rename_all = "camelCase")]
    Key {
        /// Key identifier.
        keyid: String,
        /// Key scheme (e.g. `ed25519`).
        scheme: String,
        /// Key material, encoded.
        data: String,
    },
    /// A Sigstore (Fulcio certificate) identity.
    #[serde(rename_all = "camelCase")]
    Sigstore {
        /// OIDC issuer URI.
        issuer: String,
        /// Certificate subject alternative name.
        subject_alternative_name: String,
    },
}

/// The outcome of checking an envelope's signatures.
///
/// This crate defines the record and its late-binding hook
/// ([`Envelope::set_verification`](crate::envelope::Envelope::set_verification));
/// the cryptographic engine that produces it is an external collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Signature check results.
    pub signature: SignatureVerification,
}

/// Signature verification details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureVerification {
    /// When the verification ran.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Whether the signatures checked out.
    pub verified: bool,
    /// Identities established by the verification.
    pub identities: Vec<Identity>,
}

/// A predicate over envelopes. Filters compose into [`Query`] chains with
/// AND semantics.
pub trait Filter: Send + Sync {
    /// Returns true when the envelope passes the filter.
    fn matches(&self, env: &Envelope) -> bool;
}

/// An ordered filter chain plus a post-filter limit.
///
/// `run` keeps the envelopes that pass every filter, truncated to `limit`
/// when nonzero. Running a query over its own output returns the same set.
#[derive(Clone, Default)]
pub struct Query {
    /// Filters, applied with AND semantics.
    pub filters: Vec<Arc<dyn Filter>>,
    /// Maximum number of envelopes to keep, 0 for unlimited.
    pub limit: usize,
}

impl Query {
    /// Creates an empty query (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter to the chain.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the post-filter limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Runs the query over a set of envelopes.
    pub fn run(&self, envelopes: Vec<Envelope>) -> Vec<Envelope> {
        let mut out: Vec<Envelope> = envelopes
            .into_iter()
            .filter(|env| self.filters.iter().all(|f| f.matches(env)))
            .collect();
        if self.limit > 0 {
            out.truncate(self.limit);
        }
        out
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filters", &self.filters.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Options applied to a single fetch operation.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Maximum number of envelopes to return, 0 for unlimited. Applied to
    /// the merged, filtered result set, never pushed down to drivers.
    pub limit: usize,
    /// Optional query run over the merged results.
    pub query: Option<Query>,
}

impl FetchOptions {
    /// Creates default fetch options (no limit, no query).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the limit, builder style.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the query, builder style.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }
}

/// Options applied to a single store operation. Currently carries no
/// knobs; it exists so the driver contract is stable when knobs arrive.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {}

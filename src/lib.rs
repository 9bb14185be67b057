//! # Creel -- attestation collector
//!
//! Creel gathers cryptographically signed statements about software
//! artifacts from heterogeneous backends, parses them into a uniform
//! in-memory representation, filters them by subject identity or
//! predicate type, and caches results.
//!
//! The [`Agent`] is the entry point: register repository drivers (by
//! locator string or by value), then query. A query fans out to every
//! capable driver in bounded parallel, merges the results, and applies
//! the query's filters and limit.
//!
//! ```no_run
//! use creel::{Agent, FetchOptions, ResourceDescriptor};
//!
//! # async fn collect() -> creel::Result<()> {
//! let mut agent = Agent::new();
//! agent.add_repository_from_string("fs:./attestations")?;
//! agent.add_repository_from_string("github:example/project")?;
//!
//! let subject = ResourceDescriptor::new()
//!     .with_digest("sha256", "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9");
//! let envelopes = agent
//!     .fetch_by_subject(&FetchOptions::default(), &[subject])
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | Query fan-out, merge, cache, failure policy |
//! | [`envelope`] | Format-sniffing parsers: DSSE, Sigstore bundle, JSONL, bare |
//! | [`statement`] | in-toto v1 statement decoding |
//! | [`predicate`] | Predicate parser registry and typed predicates |
//! | [`filters`] | Subject and predicate-type matchers |
//! | [`repository`] | Driver contract, factory registry, and the backends |
//! | [`cache`] | Canonical-key in-memory result cache |
//! | [`hasher`] | Content addressing of attestation sources |
//! | [`fs_guard`] | Symlink-safe, size-bounded file reads |
//!
//! ## Driver locator strings
//!
//! | Tag | Backend |
//! |-----|---------|
//! | `fs:<path>` | filesystem tree scan |
//! | `http:<url>` / `https:<url>` | HTTPS endpoint (JSONL or single document) |
//! | `coci:<image-ref>` | cosign OCI attestation attachments |
//! | `note:<repo>@<commit>` | git commit notes |
//! | `github:<owner>/<repo>` | GitHub attestation store |
//! | `release:<owner>/<repo>@<tag>` | GitHub release assets |
//! | `jsonl:<path>` | JSONL bundle file |
//! | `ossrebuild:` | Google OSS Rebuild bucket (purl subjects) |

#![forbid(unsafe_code)]

pub mod agent;
pub mod attestation;
pub mod cache;
pub mod envelope;
pub mod errors;
pub mod filters;
pub mod fs_guard;
pub mod hasher;
pub mod predicate;
pub mod repository;
pub mod statement;

pub use agent::{Agent, AgentOptions};
pub use attestation::{
    FetchOptions, Filter, PredicateType, Query, ResourceDescriptor, Signature, StoreOptions,
    Verification,
};
pub use envelope::Envelope;
pub use errors::{Error, Result};
pub use predicate::Predicate;
pub use statement::Statement;

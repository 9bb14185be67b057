//! In-memory result cache for the collector agent.
//!
//! Keys are canonical encodings of the query: subject queries hash to the
//! sorted concatenation of every subject's `name|uri|algo:digest`
//! fragments, predicate-type queries to the sorted type URIs, so the key
//! is invariant under permutation of the query inputs.
//!
//! Entries are replaced unconditionally on write; there is no TTL and no
//! eviction, so long-lived agents with unbounded query diversity grow
//! without limit. Reads clone the stored list out, so callers can never
//! mutate a cached entry.

use std::collections::HashMap;
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::attestation::{PredicateType, ResourceDescriptor};
use crate::envelope::Envelope;

struct Entry {
    envelopes: Vec<Envelope>,
    #[allow(dead_code)] // age will drive eviction when a TTL lands
    stored_at: OffsetDateTime,
}

/// Thread-safe in-memory attestation cache.
#[derive(Default)]
pub struct MemoryCache {
    subject: Mutex<HashMap<String, Entry>>,
    predicate_type: Mutex<HashMap<String, Entry>>,
}

/// Builds the canonical cache key for a subject set.
pub fn subject_key(subjects: &[ResourceDescriptor]) -> String {
    let mut keys: Vec<String> = subjects.iter().map(single_subject_key).collect();
    keys.sort();
    keys.join(":")
}

fn single_subject_key(subject: &ResourceDescriptor) -> String {
    let mut ret = String::new();
    if !subject.name.is_empty() {
        ret.push_str(&subject.name);
        ret.push('|');
    }
    if !subject.uri.is_empty() {
        ret.push_str(&subject.uri);
        ret.push('|');
    }
    // BTreeMap iteration keeps the algo fragments ordered.
    for (algo, value) in &subject.digest {
        ret.push_str(algo);
        ret.push(':');
        ret.push_str(value);
        ret.push('|');
    }
    ret
}

/// Builds the canonical cache key for a predicate-type set.
pub fn predicate_type_key(types: &[PredicateType]) -> String {
    let mut keys: Vec<&str> = types.iter().map(|t| t.0.as_str()).collect();
    keys.sort_unstable();
    keys.join(":")
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a result set for a subject query, replacing any previous
    /// entry under the same key.
    pub fn store_by_subject(&self, subjects: &[ResourceDescriptor], envelopes: &[Envelope]) {
        let entry = Entry {
            envelopes: envelopes.to_vec(),
            stored_at: OffsetDateTime::now_utc(),
        };
        self.lock_subject().insert(subject_key(subjects), entry);
    }

    /// Looks up a subject query. Returns a clone of the stored list.
    pub fn get_by_subject(&self, subjects: &[ResourceDescriptor]) -> Option<Vec<Envelope>> {
        self.lock_subject()
            .get(&subject_key(subjects))
            .map(|e| e.envelopes.clone())
    }

    /// Stores a result set for a predicate-type query.
    pub fn store_by_predicate_type(&self, types: &[PredicateType], envelopes: &[Envelope]) {
        let entry = Entry {
            envelopes: envelopes.to_vec(),
            stored_at: OffsetDateTime::now_utc(),
        };
        self.lock_predicate_type()
            .insert(predicate_type_key(types), entry);
    }

    /// Looks up a predicate-type query. Returns a clone of the stored
    /// list.
    pub fn get_by_predicate_type(&self, types: &[PredicateType]) -> Option<Vec<Envelope>> {
        self.lock_predicate_type()
            .get(&predicate_type_key(types))
            .map(|e| e.envelopes.clone())
    }

    fn lock_subject(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.subject
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_predicate_type(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.predicate_type
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

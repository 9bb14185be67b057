//! Envelope filters for subject and predicate-type matching.
//!
//! Filters implement [`Filter`](crate::attestation::Filter) and compose
//! into [`Query`](crate::attestation::Query) chains with AND semantics.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::attestation::{Filter, PredicateType};
use crate::envelope::Envelope;

/// Matches envelopes whose statement has a subject matching one of the
/// configured digest sets.
///
/// Matching semantics: for a subject to match a hash set, every
/// algorithm present in BOTH the subject and the set must carry the same
/// value, and at least one algorithm must overlap. The comparison bails
/// on the first mismatching algorithm even if another shared algorithm
/// matches -- an attestation whose sha256 agrees but whose sha1 differs
/// does not match a set carrying both.
pub struct SubjectHashMatcher {
    /// Digest sets to match against, each a map of algo to hex value.
    pub hash_sets: Vec<BTreeMap<String, String>>,
}

impl Filter for SubjectHashMatcher {
    fn matches(&self, env: &Envelope) -> bool {
        let Some(statement) = env.statement() else {
            return false;
        };

        for subject in &statement.subjects {
            if subject.digest.is_empty() {
                continue;
            }

            for hash_set in &self.hash_sets {
                let mut matched = false;
                for (algo, value) in &subject.digest {
                    let Some(expected) = hash_set.get(algo) else {
                        continue;
                    };
                    if expected == value {
                        debug!("{algo}:{expected} = {value}");
                        matched = true;
                    } else {
                        debug!("{algo}:{expected} != {value}");
                        matched = false;
                        break;
                    }
                }
                if matched {
                    return true;
                }
            }
        }

        false
    }
}

/// Matches envelopes whose statement declares one of the configured
/// predicate types.
pub struct PredicateTypeMatcher {
    /// Accepted predicate type URIs.
    pub predicate_types: HashSet<PredicateType>,
}

impl Filter for PredicateTypeMatcher {
    fn matches(&self, env: &Envelope) -> bool {
        match env.statement() {
            Some(statement) => self.predicate_types.contains(&statement.predicate_type),
            None => false,
        }
    }
}

/// Matches envelopes whose statement has no subjects. These typically
/// come from parsing plain JSON data, such as SBOMs published next to
/// artifacts.
pub struct SubjectlessMatcher;

impl Filter for SubjectlessMatcher {
    fn matches(&self, env: &Envelope) -> bool {
        match env.statement() {
            Some(statement) => statement.subjects.is_empty(),
            None => false,
        }
    }
}

/// Matches every envelope. Mostly for tests, freely usable.
pub struct AlwaysMatch;

impl Filter for AlwaysMatch {
    fn matches(&self, _env: &Envelope) -> bool {
        true
    }
}

/// Matches no envelope. Mostly for tests, freely usable.
pub struct NeverMatch;

impl Filter for NeverMatch {
    fn matches(&self, _env: &Envelope) -> bool {
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attestation::ResourceDescriptor;
    use crate::envelope::bare::BareEnvelope;
    use crate::predicate::{json::JsonParser, PredicateParser};
    use crate::statement::Statement;

    const SHA1: &str = "e67eddfacbd2e8eefec191410bcce469079bc186";
    const SHA256: &str = "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9";
    const SHA512: &str = "5f09223c36eb76fb9beb88372f8a379bc7539de6bc5425e06083550edeb874cb8e7d4805c4f8c5a6218cdff2fd8d2eb56a8059db5b63d012facab9e069f43453";

    fn envelope_with_subjects(subjects: Vec<ResourceDescriptor>) -> Envelope {
        let pred = JsonParser.parse(b"{}").unwrap();
        let mut statement = Statement::with_predicate(pred);
        for s in subjects {
            statement.add_subject(s);
        }
        Envelope::Bare(BareEnvelope {
            statement: Some(statement),
        })
    }

    fn hash_set(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn single_hash_matches() {
        let matcher = SubjectHashMatcher {
            hash_sets: vec![hash_set(&[("sha1", SHA1)])],
        };
        let env = envelope_with_subjects(vec![
            ResourceDescriptor::new().with_digest("sha1", SHA1),
        ]);
        assert!(matcher.matches(&env));
    }

    #[test]
    fn single_hash_matches_subject_with_two_hashes() {
        let matcher = SubjectHashMatcher {
            hash_sets: vec![hash_set(&[("sha1", SHA1)])],
        };
        let env = envelope_with_subjects(vec![ResourceDescriptor::new()
            .with_digest("sha1", SHA1)
            .with_digest("sha256", SHA256)]);
        assert!(matcher.matches(&env));
    }

    #[test]
    fn all_overlapping_algorithms_must_match() {
        // sha256 agrees, sha1 differs: no match.
        let matcher = SubjectHashMatcher {
            hash_sets: vec![hash_set(&[("sha1", "0000"), ("sha256", SHA256)])],
        };
        let env = envelope_with_subjects(vec![ResourceDescriptor::new()
            .with_digest("sha1", SHA1)
            .with_digest("sha256", SHA256)]);
        assert!(!matcher.matches(&env));
    }

    #[test]
    fn extra_algorithms_in_the_filter_are_ignored() {
        let matcher = SubjectHashMatcher {
            hash_sets: vec![hash_set(&[
                ("sha1", SHA1),
                ("sha256", SHA256),
                ("sha512", SHA512),
            ])],
        };
        let env = envelope_with_subjects(vec![ResourceDescriptor::new()
            .with_digest("sha1", SHA1)
            .with_digest("sha256", SHA256)]);
        assert!(matcher.matches(&env));
    }

    #[test]
    fn second_subject_can_match() {
        let matcher = SubjectHashMatcher {
            hash_sets: vec![hash_set(&[("sha256", SHA256)])],
        };
        let env = envelope_with_subjects(vec![
            ResourceDescriptor::new().with_digest("sha256", "other"),
            ResourceDescriptor::new().with_digest("sha256", SHA256),
        ]);
        assert!(matcher.matches(&env));
    }

    #[test]
    fn no_statement_never_matches() {
        let matcher = SubjectHashMatcher { hash_sets: vec![] };
        assert!(!matcher.matches(&Envelope::Bare(BareEnvelope::default())));
    }

    #[test]
    fn untyped_statements_never_match_a_predicate_type() {
        // A statement that declared no predicateType stays untyped even
        // when a typed parser recognized the predicate shape, so a
        // matcher keyed on that type must not fire.
        let data = br#"{
            "subject": [{"name": "a", "digest": {"sha256": "aa"}}],
            "predicate": {
                "builder": {"id": "https://github.com/actions/runner"},
                "buildType": "https://example.com/build@v1"
            }
        }"#;
        let statement = crate::statement::parse(data).unwrap();
        let env = Envelope::Bare(BareEnvelope {
            statement: Some(statement),
        });
        let matcher = PredicateTypeMatcher {
            predicate_types: ["https://slsa.dev/provenance/v0.2".into()]
                .into_iter()
                .collect(),
        };
        assert!(!matcher.matches(&env));
    }

    #[test]
    fn predicate_type_matcher_checks_membership() {
        let matcher = PredicateTypeMatcher {
            predicate_types: ["t1".into()].into_iter().collect(),
        };
        let pred = JsonParser.parse(b"{}").unwrap();
        let mut statement = Statement::with_predicate(pred);
        statement.predicate_type = "t1".into();
        let env = Envelope::Bare(BareEnvelope {
            statement: Some(statement),
        });
        assert!(matcher.matches(&env));

        let other = PredicateTypeMatcher {
            predicate_types: ["t2".into()].into_iter().collect(),
        };
        assert!(!other.matches(&env));
    }

    #[test]
    fn subjectless_matcher_flags_synthesized_statements() {
        let matcher = SubjectlessMatcher;
        let env = envelope_with_subjects(vec![]);
        assert!(matcher.matches(&env));
        let with_subject =
            envelope_with_subjects(vec![ResourceDescriptor::new().with_name("a")]);
        assert!(!matcher.matches(&with_subject));
    }
}

//! Bare (unsigned) envelopes.
//!
//! The bare parser makes non-enveloped attestation data usable by the
//! rest of the pipeline. Two inputs are accepted: a plain in-toto
//! statement, and any other JSON document, which is wrapped into a
//! synthesized subjectless statement whose predicate is the generic JSON
//! predicate (the usual case for plain SBOMs published next to
//! artifacts).

use crate::errors::{Error, Result};
use crate::hasher;
use crate::predicate::{self, ParseOptions};
use crate::statement::{self, Statement};

use super::Envelope;

/// An unsigned attestation. Signature accessors are empty by definition.
#[derive(Clone, Debug, Default)]
pub struct BareEnvelope {
    /// The carried statement. `None` only for envelopes constructed
    /// empty (tests, placeholders); parsing always produces one.
    pub statement: Option<Statement>,
}

impl BareEnvelope {
    /// Encodes the envelope as the statement's wire JSON.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        match &self.statement {
            Some(statement) => statement.to_json_value(),
            None => Ok(serde_json::Value::Null),
        }
    }
}

/// Parses bare JSON attestation data.
///
/// # Errors
///
/// Returns [`Error::NotCorrectFormat`] when the data is not JSON at all,
/// and surfaces predicate parse failures for JSON that cannot be wrapped.
pub fn parse(data: &[u8]) -> Result<Vec<Envelope>> {
    if data.is_empty() {
        return Err(Error::parse(
            "bare envelope",
            "short read when parsing attestation source",
        ));
    }

    let origin = hasher::hash_bytes(data);

    match statement::parse(data) {
        Ok(mut statement) => {
            statement.predicate.origin = Some(origin);
            return Ok(vec![Envelope::Bare(BareEnvelope {
                statement: Some(statement),
            })]);
        }
        Err(err) if err.is_not_correct_format() => {}
        Err(err) => return Err(err),
    }

    // Not a known statement shape: synthesize a statement around the
    // JSON as a generic predicate.
    let mut pred = predicate::parse(data, &ParseOptions::default())?;
    pred.origin = Some(origin);
    let statement = Statement::with_predicate(pred);

    Ok(vec![Envelope::Bare(BareEnvelope {
        statement: Some(statement),
    })])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wraps_plain_json_as_subjectless_statement() {
        let envelopes = parse(br#"{"spdxVersion": "SPDX-2.3", "name": "sbom"}"#).unwrap();
        assert_eq!(envelopes.len(), 1);
        let statement = envelopes[0].statement().unwrap();
        assert!(statement.subjects.is_empty());
        assert_eq!(statement.predicate.predicate_type, "text/json".into());
        assert!(statement.predicate.origin.is_some());
    }

    #[test]
    fn keeps_existing_statements_intact() {
        let data = br#"{"subject": [{"name": "a"}], "predicateType": "t", "predicate": {}}"#;
        let envelopes = parse(data).unwrap();
        let statement = envelopes[0].statement().unwrap();
        assert_eq!(statement.subjects.len(), 1);
        assert_eq!(statement.predicate_type, "t".into());
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(parse(b"").is_err());
    }

    #[test]
    fn non_json_input_is_an_error() {
        assert!(parse(b"not json").is_err());
    }
}

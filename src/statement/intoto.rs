//! The in-toto v1 statement format.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "_type": "https://in-toto.io/Statement/v1",
//!   "subject": [{"name": "...", "digest": {"sha256": "..."}}],
//!   "predicateType": "https://slsa.dev/provenance/v1",
//!   "predicate": { ... }
//! }
//! ```
//!
//! Unknown fields are tolerated. Bytes that carry neither a `predicate`
//! nor a `subject` are arbitrary JSON, not a statement, and the parser
//! signals `NotCorrectFormat` so callers can fall through.

use serde::Deserialize;

use crate::attestation::{
    PredicateType, ResourceDescriptor, Verification, STATEMENT_TYPE_URI,
};
use crate::errors::{Error, Result};
use crate::predicate::{self, ParseOptions, Predicate};

/// An in-toto v1 statement with its parsed predicate.
///
/// Immutable after parse except for the late-bound `predicate.origin` and
/// `predicate.verification` fields.
#[derive(Clone, Debug)]
pub struct Statement {
    /// Ordered subject list.
    pub subjects: Vec<ResourceDescriptor>,
    /// Declared predicate type URI.
    pub predicate_type: PredicateType,
    /// The parsed predicate.
    pub predicate: Predicate,
}

impl Statement {
    /// Creates a statement around an already-parsed predicate, taking the
    /// predicate's type as the statement type.
    pub fn with_predicate(predicate: Predicate) -> Self {
        Self {
            subjects: Vec::new(),
            predicate_type: predicate.predicate_type.clone(),
            predicate,
        }
    }

    /// Appends a subject.
    pub fn add_subject(&mut self, subject: ResourceDescriptor) {
        self.subjects.push(subject);
    }

    /// Returns the verification recorded in the predicate, if any.
    pub fn verification(&self) -> Option<&Verification> {
        self.predicate.verification.as_ref()
    }

    /// Encodes the statement into its wire JSON value.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "_type": STATEMENT_TYPE_URI,
            "subject": self.subjects,
            "predicateType": self.predicate_type,
            "predicate": self.predicate.to_json_value()?,
        }))
    }

    /// Encodes the statement into compact wire JSON bytes.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_json_value()?).map_err(|source| Error::Json {
            context: "encoding statement".to_string(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct WireStatement {
    #[serde(rename = "_type", default)]
    _statement_type: Option<String>,
    #[serde(default)]
    subject: Vec<ResourceDescriptor>,
    #[serde(rename = "predicateType", default)]
    predicate_type: Option<String>,
    #[serde(default)]
    predicate: Option<serde_json::Value>,
}

/// Parses in-toto v1 statement bytes.
///
/// The extracted predicate type is handed to the predicate registry as a
/// type hint; when the registry's typed parsers all decline, the predicate
/// comes back as generic JSON carrying the statement's declared type.
pub fn parse(data: &[u8]) -> Result<Statement> {
    if data.is_empty() {
        return Err(Error::parse(
            "statement",
            "empty statement data when attempting to parse",
        ));
    }

    let wire: WireStatement = match serde_json::from_slice(data) {
        Ok(wire) => wire,
        Err(_) => return Err(Error::NotCorrectFormat),
    };

    // Arbitrary JSON decodes into an all-empty wire statement. Require
    // something statement-shaped before committing to this format.
    if wire.predicate.is_none() && wire.subject.is_empty() {
        return Err(Error::NotCorrectFormat);
    }

    let predicate_type: PredicateType = wire.predicate_type.unwrap_or_default().into();

    let predicate_data = match &wire.predicate {
        Some(value) => serde_json::to_vec(value).map_err(|source| Error::Json {
            context: "re-encoding predicate data".to_string(),
            source,
        })?,
        None => b"null".to_vec(),
    };

    let opts = if predicate_type.is_empty() {
        ParseOptions::default()
    } else {
        ParseOptions::with_type_hints(vec![predicate_type.clone()])
    };

    let mut predicate = predicate::parse(&predicate_data, &opts)
        .map_err(|e| e.in_repository("parsing statement predicate"))?;

    // The statement's declared type wins over whatever the parser
    // assigned (the generic parser tags everything text/json). A
    // statement that declared no type stays untyped at the statement
    // level even when a parser structurally recognized the predicate.
    if !predicate_type.is_empty() {
        predicate.predicate_type = predicate_type.clone();
    }

    Ok(Statement {
        subjects: wire.subject,
        predicate_type,
        predicate,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::predicate::ParsedPredicate;

    const STATEMENT: &str = r#"{
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [
            {"name": "artifact.tgz", "digest": {"sha256": "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9"}}
        ],
        "predicateType": "https://slsa.dev/provenance/v0.2",
        "predicate": {
            "builder": {"id": "https://github.com/actions/runner"},
            "buildType": "https://example.com/build@v1"
        }
    }"#;

    #[test]
    fn parses_statement_with_typed_predicate() {
        let statement = parse(STATEMENT.as_bytes()).unwrap();
        assert_eq!(statement.subjects.len(), 1);
        assert_eq!(statement.subjects[0].name, "artifact.tgz");
        assert_eq!(
            statement.predicate_type,
            "https://slsa.dev/provenance/v0.2".into()
        );
        assert!(matches!(
            statement.predicate.parsed,
            ParsedPredicate::SlsaProvenance(_)
        ));
    }

    #[test]
    fn unknown_predicate_type_keeps_declared_type() {
        let data = br#"{
            "subject": [{"name": "a"}],
            "predicateType": "https://example.com/custom/v1",
            "predicate": {"field": 1}
        }"#;
        let statement = parse(data).unwrap();
        assert_eq!(
            statement.predicate.predicate_type,
            "https://example.com/custom/v1".into()
        );
        assert!(matches!(statement.predicate.parsed, ParsedPredicate::Json(_)));
    }

    #[test]
    fn arbitrary_json_is_not_a_statement() {
        let err = parse(br#"{"hello": "world"}"#).unwrap_err();
        assert!(matches!(err, Error::NotCorrectFormat));
    }

    #[test]
    fn non_json_is_not_a_statement() {
        let err = parse(b"plain text").unwrap_err();
        assert!(matches!(err, Error::NotCorrectFormat));
    }

    #[test]
    fn subject_only_statement_parses() {
        let data = br#"{"subject": [{"name": "a", "digest": {"sha256": "aa"}}]}"#;
        let statement = parse(data).unwrap();
        assert_eq!(statement.subjects.len(), 1);
    }

    #[test]
    fn undeclared_predicate_type_stays_empty_on_the_statement() {
        // The predicate is provenance-shaped, so a typed parser tags the
        // predicate itself; the statement-level type only ever comes
        // from the wire field and stays empty here.
        let data = br#"{
            "subject": [{"name": "a", "digest": {"sha256": "aa"}}],
            "predicate": {
                "builder": {"id": "https://github.com/actions/runner"},
                "buildType": "https://example.com/build@v1"
            }
        }"#;
        let statement = parse(data).unwrap();
        assert!(statement.predicate_type.is_empty());
        assert!(matches!(
            statement.predicate.parsed,
            ParsedPredicate::SlsaProvenance(_)
        ));
    }

    #[test]
    fn round_trips_through_wire_json() {
        let statement = parse(STATEMENT.as_bytes()).unwrap();
        let encoded = statement.to_json_vec().unwrap();
        let reparsed = parse(&encoded).unwrap();
        assert_eq!(reparsed.subjects, statement.subjects);
        assert_eq!(reparsed.predicate_type, statement.predicate_type);
    }
}
